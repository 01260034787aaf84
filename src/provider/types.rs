use crate::conversation::{Attachment, Turn};
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// System prompt sent to every backend in its native slot.
pub const SYSTEM_PROMPT: &str = "You are YOUAI, a helpful AI assistant.
Provide clear, concise, and helpful responses.
Format code snippets using markdown code blocks.
If a user's request is ambiguous, ask for clarification.";

/// Substituted when a request carries neither text nor a usable attachment.
pub const EMPTY_MESSAGE: &str = "(empty message)";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,

    /// Prior turns, oldest first. Never includes the turn being answered.
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

impl Citation {
    pub fn new(title: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            uri: uri.into(),
        }
    }
}

/// One normalized unit of streamed model output.
///
/// A sequence ends with exactly one chunk that is either `is_final` or
/// carries `error`. Error chunks are terminal on their own and never set
/// `is_final`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    pub text: Option<String>,
    pub citations: Option<Vec<Citation>>,
    pub error: Option<String>,
    pub is_final: bool,
}

impl ChatChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn citations(citations: Vec<Citation>) -> Self {
        Self {
            citations: Some(citations),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            is_final: true,
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_final || self.error.is_some()
    }
}

pub type ChunkStream = BoxStream<'static, ChatChunk>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gemini,
    OpenAi,
    Anthropic,
    Placeholder,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Gemini,
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Placeholder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Placeholder => "placeholder",
        }
    }

    /// Short human name used in error messages.
    pub const fn label(self) -> &'static str {
        match self {
            ProviderId::Gemini => "Gemini",
            ProviderId::OpenAi => "OpenAI-compatible",
            ProviderId::Anthropic => "Anthropic",
            ProviderId::Placeholder => "Placeholder",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderId {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderId::Gemini),
            "openai" | "openai-compatible" => Ok(ProviderId::OpenAi),
            "anthropic" | "claude" => Ok(ProviderId::Anthropic),
            "placeholder" | "stub" => Ok(ProviderId::Placeholder),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: &'static str,
    pub configured: bool,
}

/// Provider interface.
///
/// Implementations read credentials at call time and report every failure
/// as a terminal error chunk rather than an `Err`, so callers only ever deal
/// with one kind of sequence.
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn display_name(&self) -> &'static str;

    /// Credential readiness. Pure check over current settings, no I/O.
    fn is_configured(&self) -> bool;

    /// Start streaming a response. The returned stream is lazy: no request
    /// is made until it is first polled.
    fn stream_chat(&self, req: ChatRequest) -> ChunkStream;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_parse_with_aliases() {
        assert_eq!("google".parse::<ProviderId>(), Ok(ProviderId::Gemini));
        assert_eq!(" Claude ".parse::<ProviderId>(), Ok(ProviderId::Anthropic));
        assert_eq!("stub".parse::<ProviderId>(), Ok(ProviderId::Placeholder));
        assert!("mistral".parse::<ProviderId>().is_err());
    }

    #[test]
    fn error_chunk_is_terminal_without_final_flag() {
        let chunk = ChatChunk::error("boom");
        assert!(chunk.is_terminal());
        assert!(!chunk.is_final);
        assert!(!ChatChunk::text("a").is_terminal());
    }
}
