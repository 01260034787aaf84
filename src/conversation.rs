use crate::provider::{Citation, ProviderId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub const UNTITLED: &str = "New chat";

const TITLE_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A file sent along with a prompt, payload already base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPreview {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_previews: Vec<WebPreview>,
    #[serde(default)]
    pub is_streaming: bool,
}

impl Turn {
    pub fn user(text: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.into(),
            created_at: Utc::now(),
            attachment,
            citations: Vec::new(),
            web_previews: Vec::new(),
            is_streaming: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            text: text.into(),
            created_at: Utc::now(),
            attachment: None,
            citations: Vec::new(),
            web_previews: Vec::new(),
            is_streaming: false,
        }
    }

    /// Empty assistant turn that a stream is about to fill.
    pub fn placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::assistant("")
        }
    }
}

/// A session: ordered turns addressed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConversationRecord", into = "ConversationRecord")]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub provider: ProviderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    order: Vec<Uuid>,
    turns: HashMap<Uuid, Turn>,
}

impl Conversation {
    pub fn new(provider: ProviderId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: UNTITLED.to_string(),
            provider,
            created_at: now,
            updated_at: now,
            order: Vec::new(),
            turns: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> + '_ {
        self.order.iter().filter_map(|id| self.turns.get(id))
    }

    pub fn turn(&self, id: Uuid) -> Option<&Turn> {
        self.turns.get(&id)
    }

    pub fn turn_mut(&mut self, id: Uuid) -> Option<&mut Turn> {
        self.turns.get_mut(&id)
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.order.last().and_then(|id| self.turns.get(id))
    }

    pub fn is_streaming(&self) -> bool {
        self.turns.values().any(|t| t.is_streaming)
    }

    pub fn push(&mut self, turn: Turn) -> Uuid {
        let id = turn.id;
        if self.title == UNTITLED && turn.role == Role::User && !turn.text.trim().is_empty() {
            self.title = derive_title(&turn.text);
        }
        self.order.push(id);
        self.turns.insert(id, turn);
        self.touch();
        id
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn derive_title(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or(text).trim();
    let mut title: String = line.chars().take(TITLE_CHARS).collect();
    if line.chars().count() > TITLE_CHARS {
        title.push('…');
    }
    title
}

/// On-disk shape: turns as a plain ordered array.
#[derive(Serialize, Deserialize)]
struct ConversationRecord {
    id: Uuid,
    title: String,
    provider: ProviderId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    turns: Vec<Turn>,
}

impl From<ConversationRecord> for Conversation {
    fn from(rec: ConversationRecord) -> Self {
        let mut order = Vec::with_capacity(rec.turns.len());
        let mut turns = HashMap::with_capacity(rec.turns.len());
        for mut turn in rec.turns {
            // Nothing is streaming right after a load.
            turn.is_streaming = false;
            if turns.insert(turn.id, turn.clone()).is_none() {
                order.push(turn.id);
            }
        }
        Self {
            id: rec.id,
            title: rec.title,
            provider: rec.provider,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
            order,
            turns,
        }
    }
}

impl From<Conversation> for ConversationRecord {
    fn from(conv: Conversation) -> Self {
        let Conversation {
            id,
            title,
            provider,
            created_at,
            updated_at,
            order,
            mut turns,
        } = conv;
        Self {
            id,
            title,
            provider,
            created_at,
            updated_at,
            turns: order.iter().filter_map(|id| turns.remove(id)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_user_turn_names_the_conversation() {
        let mut conv = Conversation::new(ProviderId::Placeholder);
        conv.push(Turn::assistant("welcome"));
        assert_eq!(conv.title, UNTITLED);

        conv.push(Turn::user(
            "\nHow do I write a streaming parser in Rust without allocating?",
            None,
        ));
        assert_eq!(conv.title, "How do I write a streaming parser in Rus…");

        conv.push(Turn::user("second question", None));
        assert!(conv.title.starts_with("How do I"));
    }

    #[test]
    fn serializes_turns_in_order_and_clears_streaming_on_load() {
        let mut conv = Conversation::new(ProviderId::Gemini);
        let a = conv.push(Turn::user("one", None));
        let b = conv.push(Turn::placeholder());
        conv.turn_mut(b).unwrap().text.push_str("two");

        let json = serde_json::to_string(&conv).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["turns"][0]["text"], "one");
        assert_eq!(value["turns"][1]["text"], "two");
        assert_eq!(value["provider"], "gemini");

        let back: Conversation = serde_json::from_str(&json).unwrap();
        let ids: Vec<_> = back.turns().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(!back.is_streaming());
    }
}
