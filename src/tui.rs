#![cfg(feature = "tui")]

use crate::app;
use crate::augment::AugmentOptions;
use crate::chat::{Aggregator, Chat, ChatError, Step, UserInput};
use crate::conversation::{Attachment, Role};
use crate::provider::{ChatChunk, ProviderId};
use crate::store::{Store, TurnTarget};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use tokio::sync::mpsc;

const HELP: &str = "Enter sends. Commands: /new, /provider <id>, /sessions, /switch <id>, \
/rename <title>, /delete, /file <path>, /web on|off, /deep on|off, /quit";

/// Messages from stream pump tasks. Each carries the target captured at send.
enum PumpMsg {
    Chunk(TurnTarget, ChatChunk),
    Closed(TurnTarget),
}

struct Ui {
    chat: Chat,
    store: Store,
    options: AugmentOptions,
    input: String,
    attachment: Option<Attachment>,
    notice: Option<String>,
    inflight: HashMap<TurnTarget, Aggregator>,
    pump_tx: mpsc::UnboundedSender<PumpMsg>,
}

pub async fn run_tui(chat: Chat, store: Store, options: AugmentOptions) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let (pump_tx, mut pump_rx) = mpsc::unbounded_channel::<PumpMsg>();
    let mut ui = Ui {
        chat,
        store,
        options,
        input: String::new(),
        attachment: None,
        notice: Some(HELP.to_string()),
        inflight: HashMap::new(),
        pump_tx,
    };

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &ui) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if ui.handle_key(key).await {
                        break Ok(());
                    }
                }
            }
            Some(msg) = pump_rx.recv() => ui.on_pump(msg),
        }
    };

    // Anything still streaming is abandoned with the UI.
    for (_, mut agg) in ui.inflight.drain() {
        agg.settle(&mut ui.store);
    }

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

impl Ui {
    fn on_pump(&mut self, msg: PumpMsg) {
        match msg {
            PumpMsg::Chunk(target, chunk) => {
                let Some(agg) = self.inflight.get_mut(&target) else {
                    return;
                };
                match agg.apply(&mut self.store, chunk) {
                    Step::Continue => {}
                    Step::Finished | Step::Abandoned => {
                        self.inflight.remove(&target);
                    }
                    Step::Failed(message) => {
                        self.inflight.remove(&target);
                        self.notice = Some(format!("Error: {message}"));
                    }
                }
            }
            PumpMsg::Closed(target) => {
                if let Some(mut agg) = self.inflight.remove(&target) {
                    agg.settle(&mut self.store);
                }
            }
        }
    }

    /// Returns true when the UI should exit.
    async fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return true;
        }

        match key.code {
            KeyCode::Esc => return true,
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => {
                let msg = std::mem::take(&mut self.input);
                let msg = msg.trim();
                if msg.starts_with('/') {
                    return self.command(msg);
                }
                self.send(msg.to_string()).await;
            }
            _ => {}
        }
        false
    }

    fn command(&mut self, line: &str) -> bool {
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();
        let active = self.store.active_id();
        self.notice = None;

        match cmd {
            "/quit" => return true,
            "/help" => self.notice = Some(HELP.to_string()),
            "/new" => {
                let provider = self.store.active().provider;
                self.store.new_session(Some(provider));
            }
            "/provider" => match arg.parse::<ProviderId>() {
                Ok(id) => {
                    self.store.set_provider(active, id);
                    let ready = self.chat.registry().get(id).is_configured();
                    self.notice = Some(if ready {
                        format!("provider set to {id}")
                    } else {
                        format!("provider set to {id} (no credentials configured)")
                    });
                }
                Err(e) => self.notice = Some(e.to_string()),
            },
            "/sessions" => {
                let list: Vec<String> = self
                    .store
                    .conversations()
                    .iter()
                    .map(|c| {
                        let id = c.id.to_string();
                        format!("{} {}", &id[..8], c.title)
                    })
                    .collect();
                self.notice = Some(list.join("  |  "));
            }
            "/switch" => match self.store.find(arg) {
                Some(id) => {
                    self.store.switch(id);
                }
                None => self.notice = Some(format!("no single session matches {arg:?}")),
            },
            "/rename" if !arg.is_empty() => {
                self.store.rename(active, arg);
            }
            "/delete" => {
                self.store.delete(active);
            }
            "/file" => match app::read_attachment(Path::new(arg)) {
                Ok(att) => {
                    self.notice = Some(format!("attached {} ({})", att.name, att.mime_type));
                    self.attachment = Some(att);
                }
                Err(e) => self.notice = Some(format!("{e:#}")),
            },
            "/web" => {
                self.options.web_search = arg == "on";
                self.notice = Some(format!("web search {}", if self.options.web_search { "on" } else { "off" }));
            }
            "/deep" => {
                self.options.deep_thinking = arg == "on";
                self.notice = Some(format!("deep thinking {}", if self.options.deep_thinking { "on" } else { "off" }));
            }
            _ => self.notice = Some(format!("unknown command: {line}")),
        }
        false
    }

    async fn send(&mut self, text: String) {
        if text.is_empty() && self.attachment.is_none() {
            return;
        }
        let input = UserInput {
            text,
            attachment: self.attachment.take(),
        };
        let conversation = self.store.active_id();
        let pending = match self
            .chat
            .begin(&mut self.store, conversation, input.clone(), &self.options)
            .await
        {
            Ok(p) => p,
            Err(ChatError::Busy) => {
                self.input = input.text;
                self.attachment = input.attachment;
                self.notice = Some("a reply is still streaming; wait for it to finish".to_string());
                return;
            }
            Err(ChatError::EmptyInput) => return,
            Err(e) => {
                self.notice = Some(e.to_string());
                return;
            }
        };

        let target = pending.target;
        self.inflight.insert(target, Aggregator::new(target));
        let tx = self.pump_tx.clone();
        let mut stream = pending.stream;
        tokio::spawn(async move {
            use tokio_stream::StreamExt;
            while let Some(chunk) = stream.next().await {
                let last = chunk.is_terminal();
                if tx.send(PumpMsg::Chunk(target, chunk)).is_err() || last {
                    return;
                }
            }
            let _ = tx.send(PumpMsg::Closed(target));
        });
    }
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, ui: &Ui) -> anyhow::Result<()> {
    let conv = ui.store.active();
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for turn in conv.turns() {
            let (role, style) = match turn.role {
                Role::User => ("you: ", Style::default().add_modifier(Modifier::BOLD)),
                Role::Assistant => ("assistant: ", Style::default()),
            };
            text.lines.push(Line::styled(role, style));
            let mut body = turn.text.clone();
            if turn.is_streaming {
                body.push('▌');
            }
            text.lines.extend(Text::from(body).lines);
            if let Some(att) = &turn.attachment {
                text.lines.push(Line::from(format!("  (attached {})", att.name)));
            }
            for (i, c) in turn.citations.iter().enumerate() {
                text.lines.push(Line::from(format!("  [{}] {} <{}>", i + 1, c.title, c.uri)));
            }
            text.lines.push(Line::from(""));
        }

        let title = format!("youai | {} | {}", conv.provider, conv.title);
        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });

        let status = ui.notice.clone().unwrap_or_else(|| {
            let mut flags = Vec::new();
            if ui.options.web_search {
                flags.push("web");
            }
            if ui.options.deep_thinking {
                flags.push("deep");
            }
            if ui.attachment.is_some() {
                flags.push("file");
            }
            flags.join(" ")
        });

        let input_w = Paragraph::new(ui.input.clone())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(Paragraph::new(status), chunks[1]);
        f.render_widget(input_w, chunks[2]);

        let x = chunks[2].x + 1 + ui.input.chars().count() as u16;
        let y = chunks[2].y + 1;
        f.set_cursor_position((x.min(chunks[2].x + chunks[2].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
