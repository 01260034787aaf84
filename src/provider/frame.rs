//! Incremental framing for streamed HTTP bodies.
//!
//! Bytes arrive in arbitrary pieces; the decoder buffers them and hands back
//! every frame that became complete with the latest push. Two framings are
//! supported:
//!
//! - [`Framing::Lines`]: one JSON document per line, optionally prefixed
//!   with `data:` (OpenAI-style chunked completions).
//! - [`Framing::Events`]: server-sent events. `event:` names the current
//!   block, `data:` lines accumulate, a blank line dispatches.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Lines,
    Events,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
    event: Option<String>,
    data: String,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
            event: None,
            data: String::new(),
        }
    }

    pub fn lines() -> Self {
        Self::new(Framing::Lines)
    }

    pub fn events() -> Self {
        Self::new(Framing::Events)
    }

    /// Feed one raw piece of the body. Returns the frames it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            let line = match std::str::from_utf8(&line) {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping stream line that is not valid UTF-8");
                    continue;
                }
            };

            let frame = match self.framing {
                Framing::Lines => Self::line_frame(line),
                Framing::Events => self.event_line(line),
            };
            out.extend(frame);
        }

        out
    }

    /// Flush whatever is left once the body has closed.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.buf);
        let frame = match std::str::from_utf8(&rest) {
            Ok(line) if !line.trim().is_empty() => match self.framing {
                Framing::Lines => Self::line_frame(line.trim_end_matches('\r')),
                Framing::Events => self.event_line(line.trim_end_matches('\r')),
            },
            _ => None,
        };
        frame.or_else(|| match self.framing {
            Framing::Events => self.dispatch(),
            Framing::Lines => None,
        })
    }

    fn line_frame(line: &str) -> Option<Frame> {
        let line = line.trim();
        let data = if let Some(rest) = line.strip_prefix("data:") {
            rest.trim_start()
        } else if line.starts_with('{') || line.starts_with('[') {
            line
        } else {
            // event:, id:, retry:, ": keep-alive" comments
            return None;
        };

        if data.is_empty() {
            return None;
        }
        Some(Frame {
            event: None,
            data: data.to_string(),
        })
    }

    fn event_line(&mut self, line: &str) -> Option<Frame> {
        if line.trim().is_empty() {
            return self.dispatch();
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            // A single optional space after the colon belongs to the syntax.
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(rest);
        }
        // id:, retry: and comments are ignored.
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(Frame {
            event,
            data: std::mem::take(&mut self.data),
        })
    }
}
