use crate::augment::AugmentOptions;
use crate::chat::{Chat, ChatError, UserInput};
use crate::cli::{AugmentArgs, KeyCommand, SessionCommand};
use crate::conversation::{Attachment, Role};
use crate::provider::{ProviderId, Registry};
use crate::settings::{self, Layer, Settings};
use crate::store::Store;
use anyhow::{bail, Context};
use base64::Engine as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One prompt from the command line.
pub struct Ask {
    pub prompt: String,
    pub file: Option<PathBuf>,
    pub provider: Option<ProviderId>,
    pub new_session: bool,
    pub options: AugmentOptions,
}

/// Apply command-line flags on top of the configured defaults.
pub fn merge_options(mut base: AugmentOptions, flags: &AugmentArgs) -> AugmentOptions {
    base.web_search |= flags.web_search;
    base.deep_thinking |= flags.deep_thinking;
    if let Some(n) = flags.max_results {
        base.max_results = n;
    }
    if flags.citation_style.is_some() {
        base.citation_style = flags.citation_style;
    }
    if flags.detail.is_some() {
        base.output_detail = flags.detail;
    }
    base
}

/// Settings key holding the model name for a provider.
pub fn model_key(id: ProviderId) -> Option<&'static str> {
    match id {
        ProviderId::Gemini => Some(settings::GEMINI_MODEL),
        ProviderId::OpenAi => Some(settings::OPENAI_MODEL),
        ProviderId::Anthropic => Some(settings::ANTHROPIC_MODEL),
        ProviderId::Placeholder => None,
    }
}

pub async fn cmd_ask(chat: &Chat, store: &mut Store, ask: Ask) -> anyhow::Result<()> {
    if ask.new_session {
        store.new_session(ask.provider);
    }
    let conversation = store.active_id();
    if let Some(p) = ask.provider {
        if store.active().provider != p {
            store.set_provider(conversation, p);
        }
    }

    let attachment = match &ask.file {
        Some(path) => Some(read_attachment(path)?),
        None => None,
    };
    let input = UserInput {
        text: ask.prompt,
        attachment,
    };

    let mut out = std::io::stdout();
    let result = chat
        .send(store, conversation, input, &ask.options, |chunk| {
            if let Some(text) = &chunk.text {
                print!("{text}");
                out.flush().ok();
            }
        })
        .await;
    println!();

    let target = match result {
        Ok(target) => target,
        Err(ChatError::CredentialMissing { provider }) => bail!(
            "{provider} API key is not configured. Set it with `youai key set`, or pick another provider with --provider."
        ),
        Err(e) => return Err(e.into()),
    };

    if let Some(turn) = store.turn(target) {
        if !turn.citations.is_empty() {
            println!("\nSources:");
            for (i, c) in turn.citations.iter().enumerate() {
                println!("  [{}] {} <{}>", i + 1, c.title, c.uri);
            }
        }
    }
    Ok(())
}

pub fn cmd_providers(registry: &Registry, default: ProviderId) -> anyhow::Result<()> {
    for d in registry.descriptors() {
        let marker = if d.id == default { "*" } else { " " };
        let state = if d.configured { "ready" } else { "no credentials" };
        println!("{marker} {:<12} {:<22} {state}", d.id.as_str(), d.display_name);
    }
    Ok(())
}

pub fn cmd_sessions(store: &mut Store, cmd: SessionCommand) -> anyhow::Result<()> {
    match cmd {
        SessionCommand::List => {
            let active = store.active_id();
            for conv in store.conversations() {
                let marker = if conv.id == active { "*" } else { " " };
                println!(
                    "{marker} {}  {:<11} {:>3} turns  {}  {}",
                    short(conv.id),
                    conv.provider.as_str(),
                    conv.len(),
                    conv.updated_at.format("%Y-%m-%d %H:%M"),
                    conv.title
                );
            }
        }
        SessionCommand::Show { id } => {
            let id = match id {
                Some(id) => find(store, &id)?,
                None => store.active_id(),
            };
            let conv = store.get(id).context("no such session")?;
            println!("# {} ({})\n", conv.title, conv.provider);
            for turn in conv.turns() {
                let who = match turn.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("[{who}] {}", turn.text);
                if let Some(att) = &turn.attachment {
                    println!("  (attached {})", att.name);
                }
                for (i, c) in turn.citations.iter().enumerate() {
                    println!("  [{}] {} <{}>", i + 1, c.title, c.uri);
                }
                println!();
            }
        }
        SessionCommand::New => {
            let id = store.new_session(None);
            println!("{id}");
        }
        SessionCommand::Switch { id } => {
            let id = find(store, &id)?;
            store.switch(id);
            println!("Switched to {}", short(id));
        }
        SessionCommand::Rename { id, title } => {
            let id = find(store, &id)?;
            let title = title.join(" ");
            if title.trim().is_empty() {
                bail!("title must not be empty");
            }
            store.rename(id, &title);
        }
        SessionCommand::Delete { id } => {
            let id = find(store, &id)?;
            store.delete(id);
            println!("Deleted {}", short(id));
        }
        SessionCommand::Export { id, json } => {
            let id = find(store, &id)?;
            let text = if json {
                store.export_json(id)?
            } else {
                store.export_markdown(id)?
            };
            println!("{text}");
        }
        SessionCommand::Search { query } => {
            let hits = store.search(&query.join(" "));
            if hits.is_empty() {
                println!("No matches.");
            }
            for hit in hits {
                println!("{}  {}: {}", short(hit.conversation), hit.conversation_title, hit.snippet);
            }
        }
    }
    Ok(())
}

pub fn cmd_key(settings: &Settings, cmd: KeyCommand) -> anyhow::Result<()> {
    match cmd {
        KeyCommand::Set { key, value } => {
            let key = known_key(&key)?;
            if value.trim().is_empty() {
                bail!("value must not be empty; use `youai key unset {key}` to remove it");
            }
            settings.set_override(key, &value)?;
            println!("Saved {key}");
        }
        KeyCommand::Unset { key } => {
            let key = known_key(&key)?;
            if settings.remove_override(key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
        KeyCommand::Show => {
            for key in settings::KEYS {
                let Some((value, layer)) = settings.resolve(key) else {
                    println!("{key:<22} (unset)");
                    continue;
                };
                let shown = if is_secret(key) {
                    settings::mask(&value)
                } else {
                    value
                };
                let from = match layer {
                    Layer::Override => "override",
                    Layer::BuildTime => "build",
                    Layer::Environment => "env",
                };
                println!("{key:<22} {shown}  ({from})");
            }
        }
    }
    Ok(())
}

/// Read a file into an attachment, guessing its type from the extension.
pub fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read attachment: {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(Attachment {
        mime_type: mime_for(path).to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
        name,
    })
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "md" | "rs" | "toml" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn known_key(key: &str) -> anyhow::Result<&'static str> {
    let wanted = key.trim().to_ascii_uppercase();
    settings::KEYS
        .into_iter()
        .find(|k| *k == wanted)
        .with_context(|| format!("unknown key {key:?}; known keys: {}", settings::KEYS.join(", ")))
}

fn is_secret(key: &str) -> bool {
    key.ends_with("_KEY") || key.ends_with("_TOKEN")
}

fn find(store: &Store, needle: &str) -> anyhow::Result<Uuid> {
    store
        .find(needle)
        .with_context(|| format!("no single session matches {needle:?}"))
}

fn short(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
