//! Sessions and their turns, persisted best-effort as JSON.
//!
//! Two files live in the state directory: `conversations.json` (an array of
//! conversations) and `active_conversation` (the selected id). Both are read
//! once at startup and rewritten after every mutation.

use crate::conversation::{Conversation, Role, Turn};
use crate::provider::ProviderId;
use anyhow::Context;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CONVERSATIONS_FILE: &str = "conversations.json";
pub const ACTIVE_FILE: &str = "active_conversation";

const SNIPPET_RADIUS: usize = 30;

/// Addresses one turn inside one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnTarget {
    pub conversation: Uuid,
    pub turn: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub conversation: Uuid,
    pub conversation_title: String,
    pub turn: Uuid,
    pub role: Role,
    pub snippet: String,
}

#[derive(Debug)]
pub struct Store {
    conversations: Vec<Conversation>,
    active: Uuid,
    dir: Option<PathBuf>,
    default_provider: ProviderId,
}

impl Store {
    /// Store without persistence.
    pub fn in_memory(default_provider: ProviderId) -> Self {
        let conv = Conversation::new(default_provider);
        Self {
            active: conv.id,
            conversations: vec![conv],
            dir: None,
            default_provider,
        }
    }

    /// Load from `dir`. Missing or unreadable data yields one fresh session.
    pub fn open(dir: impl Into<PathBuf>, default_provider: ProviderId) -> Self {
        let dir = dir.into();
        let conversations = match read_conversations(&dir.join(CONVERSATIONS_FILE)) {
            Ok(convs) => convs,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "discarding unreadable conversations");
                Vec::new()
            }
        };
        let active = std::fs::read_to_string(dir.join(ACTIVE_FILE))
            .ok()
            .and_then(|s| s.trim().parse::<Uuid>().ok());

        let mut store = Self {
            active: Uuid::nil(),
            conversations,
            dir: Some(dir),
            default_provider,
        };
        if store.conversations.is_empty() {
            let conv = Conversation::new(default_provider);
            store.active = conv.id;
            store.conversations.push(conv);
            store.save();
        } else {
            store.active = match active {
                Some(id) if store.get(id).is_some() => id,
                _ => store.conversations[0].id,
            };
        }
        tracing::debug!(sessions = store.conversations.len(), active = %store.active, "loaded conversations");
        store
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active_id(&self) -> Uuid {
        self.active
    }

    pub fn active(&self) -> &Conversation {
        // `active` always names an existing conversation.
        self.get(self.active).unwrap_or(&self.conversations[0])
    }

    pub fn get(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Find by full id or unique id prefix.
    pub fn find(&self, needle: &str) -> Option<Uuid> {
        let needle = needle.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }
        let mut hits = self
            .conversations
            .iter()
            .filter(|c| c.id.to_string().starts_with(&needle));
        match (hits.next(), hits.next()) {
            (Some(c), None) => Some(c.id),
            _ => None,
        }
    }

    pub fn is_loading(&self, id: Uuid) -> bool {
        self.get(id).is_some_and(Conversation::is_streaming)
    }

    pub fn new_session(&mut self, provider: Option<ProviderId>) -> Uuid {
        let conv = Conversation::new(provider.unwrap_or(self.default_provider));
        let id = conv.id;
        self.conversations.insert(0, conv);
        self.active = id;
        self.save();
        id
    }

    pub fn switch(&mut self, id: Uuid) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active = id;
        self.save();
        true
    }

    pub fn rename(&mut self, id: Uuid, title: &str) -> bool {
        let title = title.trim();
        let Some(conv) = self.get_mut(id) else {
            return false;
        };
        if !title.is_empty() {
            conv.title = title.to_string();
            conv.touch();
        }
        self.save();
        true
    }

    /// Remove a session. The store never ends up empty.
    pub fn delete(&mut self, id: Uuid) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return false;
        }
        if self.conversations.is_empty() {
            self.conversations.push(Conversation::new(self.default_provider));
        }
        if self.active == id {
            self.active = self.conversations[0].id;
        }
        self.save();
        true
    }

    pub fn set_provider(&mut self, id: Uuid, provider: ProviderId) -> bool {
        let Some(conv) = self.get_mut(id) else {
            return false;
        };
        conv.provider = provider;
        conv.touch();
        self.save();
        true
    }

    pub fn push_turn(&mut self, conversation: Uuid, turn: Turn) -> Option<TurnTarget> {
        let conv = self.get_mut(conversation)?;
        let turn = conv.push(turn);
        self.save();
        Some(TurnTarget { conversation, turn })
    }

    pub fn turn(&self, target: TurnTarget) -> Option<&Turn> {
        self.get(target.conversation)?.turn(target.turn)
    }

    /// Mutate one turn in place. Returns `None` if it no longer exists.
    ///
    /// Streaming deltas stay in memory; the turn is written once it settles.
    pub fn update_turn<R>(&mut self, target: TurnTarget, f: impl FnOnce(&mut Turn) -> R) -> Option<R> {
        let conv = self.get_mut(target.conversation)?;
        let turn = conv.turn_mut(target.turn)?;
        let out = f(turn);
        let settled = !turn.is_streaming;
        conv.touch();
        if settled {
            self.save();
        }
        Some(out)
    }

    /// Case-insensitive text search across every session.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits = Vec::new();
        for conv in &self.conversations {
            for turn in conv.turns() {
                if let Some(snippet) = snippet_around(&turn.text, &needle) {
                    hits.push(SearchHit {
                        conversation: conv.id,
                        conversation_title: conv.title.clone(),
                        turn: turn.id,
                        role: turn.role,
                        snippet,
                    });
                }
            }
        }
        hits
    }

    pub fn export_json(&self, id: Uuid) -> anyhow::Result<String> {
        let conv = self.get(id).context("no such conversation")?;
        serde_json::to_string_pretty(conv).context("failed to encode conversation")
    }

    pub fn export_markdown(&self, id: Uuid) -> anyhow::Result<String> {
        let conv = self.get(id).context("no such conversation")?;
        let mut out = format!("# {}\n\n", conv.title);
        for turn in conv.turns() {
            let who = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(&format!(
                "## {who} ({})\n\n{}\n",
                turn.created_at.format("%Y-%m-%d %H:%M"),
                turn.text
            ));
            if let Some(att) = &turn.attachment {
                out.push_str(&format!("\n_Attachment: {} ({})_\n", att.name, att.mime_type));
            }
            if !turn.citations.is_empty() {
                out.push_str("\nSources:\n");
                for (i, c) in turn.citations.iter().enumerate() {
                    out.push_str(&format!("{}. [{}]({})\n", i + 1, c.title, c.uri));
                }
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Best-effort write of both files.
    pub fn save(&self) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = self.write_to(dir) {
            tracing::warn!(error = %format!("{e:#}"), "failed to persist conversations");
        }
    }

    fn write_to(&self, dir: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(&self.conversations).context("failed to encode conversations")?;
        crate::paths::write_atomic(&dir.join(CONVERSATIONS_FILE), &bytes)?;
        crate::paths::write_atomic(&dir.join(ACTIVE_FILE), self.active.to_string().as_bytes())
    }
}

fn read_conversations(path: &Path) -> anyhow::Result<Vec<Conversation>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("failed to read: {}", path.display()))
        }
    };
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse JSON: {}", path.display()))
}

fn snippet_around(text: &str, needle: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let byte = lower.find(needle)?;
    // Lowercasing can shift byte offsets; work in chars from here on.
    let at = lower[..byte].chars().count();
    let chars: Vec<char> = text.chars().collect();
    let start = at.saturating_sub(SNIPPET_RADIUS);
    let end = (at + needle.chars().count() + SNIPPET_RADIUS).min(chars.len());
    let mut snippet: String = chars[start.min(chars.len())..end].iter().collect();
    snippet = snippet.replace('\n', " ");
    if start > 0 {
        snippet.insert(0, '…');
    }
    if end < chars.len() {
        snippet.push('…');
    }
    Some(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_keeps_one_session_and_moves_active() {
        let mut store = Store::in_memory(ProviderId::Placeholder);
        let first = store.active_id();
        let second = store.new_session(None);
        assert_eq!(store.active_id(), second);

        assert!(store.delete(second));
        assert_eq!(store.active_id(), first);

        assert!(store.delete(first));
        assert_eq!(store.conversations().len(), 1);
        assert_ne!(store.active_id(), first);
        assert!(!store.delete(first));
    }

    #[test]
    fn update_turn_reports_missing_targets() {
        let mut store = Store::in_memory(ProviderId::Placeholder);
        let conv = store.active_id();
        let target = store.push_turn(conv, Turn::placeholder()).unwrap();
        assert!(store.is_loading(conv));

        store.update_turn(target, |t| t.is_streaming = false).unwrap();
        assert!(!store.is_loading(conv));

        store.delete(conv);
        assert!(store.update_turn(target, |t| t.text.push('x')).is_none());
    }

    #[test]
    fn search_finds_snippets_across_sessions() {
        let mut store = Store::in_memory(ProviderId::Placeholder);
        let a = store.active_id();
        store.push_turn(a, Turn::user("How do lifetimes work in Rust?", None));
        let b = store.new_session(None);
        store.push_turn(b, Turn::assistant("Lifetimes are regions of code."));

        let hits = store.search("LIFETIMES");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|h| h.conversation == a && h.role == Role::User));
        assert!(store.search("   ").is_empty());
    }

    #[test]
    fn find_accepts_unique_prefixes() {
        let mut store = Store::in_memory(ProviderId::Placeholder);
        let id = store.active_id();
        store.new_session(None);
        assert_eq!(store.find(&id.to_string()), Some(id));
        assert_eq!(store.find(""), None);
    }

    #[test]
    fn snippet_is_windowed() {
        let text = format!("{}needle{}", "a".repeat(50), "b".repeat(50));
        let s = snippet_around(&text, "needle").unwrap();
        assert!(s.starts_with('…') && s.ends_with('…'));
        assert!(s.contains("needle"));
    }
}
