mod error;
pub mod frame;
mod types;

pub mod anthropic;
#[cfg(feature = "google")]
pub mod gemini;
pub mod openai;
pub mod placeholder;
pub mod registry;

pub use error::ProviderError;
pub use registry::Registry;
pub use types::*;

use crate::conversation::{Attachment, Turn};
use async_stream::stream;
use frame::{Frame, FrameDecoder};
use futures_core::Stream;
use tokio_stream::StreamExt;

/// What an adapter made of one decoded frame.
pub(crate) enum Decoded {
    Chunk(ChatChunk),
    Skip,
    /// Terminal sentinel: stop reading, then finish normally.
    Done,
    Fail(ProviderError),
}

/// Send the request and insist on a success status.
pub(crate) async fn open_stream(
    provider: &'static str,
    req: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let resp = req
        .send()
        .await
        .map_err(|e| ProviderError::network(provider, e))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ProviderError::transport(provider, status, &text));
    }
    Ok(resp)
}

/// Drive a response body through `decoder`, interpreting every frame.
///
/// Ends with one `done` chunk after the body closes or a [`Decoded::Done`]
/// sentinel, or with one error chunk on a read failure or
/// [`Decoded::Fail`].
pub(crate) fn decode_body<F>(
    provider: &'static str,
    resp: reqwest::Response,
    mut decoder: FrameDecoder,
    mut interpret: F,
) -> impl Stream<Item = ChatChunk> + Send + 'static
where
    F: FnMut(Frame) -> Decoded + Send + 'static,
{
    stream! {
        let mut body = resp.bytes_stream();
        let mut closed = false;

        while !closed {
            let frames = match body.next().await {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) => {
                    yield ChatChunk::error(ProviderError::network(provider, e).to_string());
                    return;
                }
                None => {
                    closed = true;
                    decoder.finish().into_iter().collect()
                }
            };

            for frame in frames {
                match interpret(frame) {
                    Decoded::Chunk(chunk) => {
                        yield chunk;
                    }
                    Decoded::Skip => {}
                    Decoded::Done => {
                        closed = true;
                        break;
                    }
                    Decoded::Fail(err) => {
                        tracing::warn!(provider, error = %err, "provider reported an error mid-stream");
                        yield ChatChunk::error(err.to_string());
                        return;
                    }
                }
            }
        }

        yield ChatChunk::done();
    }
}

/// Parse a frame's JSON payload, logging and skipping it when malformed.
pub(crate) fn parse_frame<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    frame: &Frame,
) -> Option<T> {
    match serde_json::from_str(&frame.data) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(provider, error = %e, data = %frame.data, "skipping malformed frame");
            None
        }
    }
}

/// The image attachment of a turn, if it has one the backends can take.
pub(crate) fn image_of(attachment: Option<&Attachment>) -> Option<&Attachment> {
    let att = attachment?;
    if att.is_image() {
        Some(att)
    } else {
        tracing::warn!(name = %att.name, mime = %att.mime_type, "ignoring non-image attachment");
        None
    }
}

/// Prior turns worth sending: anything with text or an image.
pub(crate) fn sendable(history: &[Turn]) -> impl Iterator<Item = &Turn> {
    history.iter().filter(|t| {
        !t.is_streaming
            && (!t.text.trim().is_empty() || t.attachment.as_ref().is_some_and(Attachment::is_image))
    })
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
