use super::{ChatChunk, ChatRequest, ChunkStream, Citation, Provider, ProviderError, ProviderId};
use crate::settings::{self, Settings};
use async_stream::stream;
use std::time::Duration;

const NAME: &str = ProviderId::Placeholder.label();

/// Delay between scripted fragments.
pub const DEFAULT_PACE: Duration = Duration::from_millis(250);

/// Fixed body streamed after the echo of the prompt.
pub const SCRIPT: [&str; 5] = [
    "\n\nThis is a *simulated* response from the Placeholder LLM.",
    " It streams text like a real model would.",
    "\n\nHere's some **mock** data:\n",
    "- Item 1\n- Item 2\n- Item 3\n\n",
    "```rust\nprintln!(\"Hello from Placeholder!\");\n```",
];

pub fn sources() -> Vec<Citation> {
    vec![
        Citation::new("Placeholder Source 1", "https://example.com/placeholder-source1"),
        Citation::new("Placeholder Source 2", "https://example.com/placeholder-source2"),
    ]
}

/// Offline provider with a deterministic script, for demos and tests.
#[derive(Debug, Clone)]
pub struct PlaceholderProvider {
    settings: Settings,
    pace: Duration,
}

impl PlaceholderProvider {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            pace: DEFAULT_PACE,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }
}

impl Provider for PlaceholderProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Placeholder
    }

    fn display_name(&self) -> &'static str {
        "Placeholder LLM"
    }

    fn is_configured(&self) -> bool {
        self.settings.is_set(settings::PLACEHOLDER_API_KEY)
    }

    fn stream_chat(&self, req: ChatRequest) -> ChunkStream {
        let settings = self.settings.clone();
        let pace = self.pace;

        Box::pin(stream! {
            if !settings.is_set(settings::PLACEHOLDER_API_KEY) {
                yield ChatChunk::error(ProviderError::CredentialMissing { provider: NAME }.to_string());
                return;
            }

            yield ChatChunk::text(format!("Placeholder received: \"{}\"", req.prompt));
            tokio::time::sleep(pace).await;

            if let Some(att) = &req.attachment {
                yield ChatChunk::text(format!(" and file \"{}\".", att.name));
                tokio::time::sleep(pace).await;
            }

            for part in SCRIPT {
                yield ChatChunk::text(part);
                tokio::time::sleep(pace).await;
            }

            yield ChatChunk::citations(sources());
            yield ChatChunk::done();
        })
    }
}
