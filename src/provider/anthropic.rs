//! Anthropic Messages API over server-sent events.
//!
//! The stream is a sequence of named events (`message_start`,
//! `content_block_start`, `content_block_delta`, `message_delta`,
//! `message_stop`, `ping`, `error`). Text only ever arrives in
//! `content_block_delta`; the stream ends when the body closes.

use super::frame::{Frame, FrameDecoder};
use super::{
    decode_body, image_of, open_stream, parse_frame, sendable, trim_base, ChatChunk, ChatRequest,
    ChunkStream, Decoded, Provider, ProviderError, ProviderId, EMPTY_MESSAGE, SYSTEM_PROMPT,
};
use crate::conversation::{Attachment, Role};
use crate::settings::{self, Settings};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

const NAME: &str = ProviderId::Anthropic.label();
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

const CONTENT_DELTA: &str = "content_block_delta";
const ERROR_EVENT: &str = "error";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    settings: Settings,
}

impl AnthropicProvider {
    pub fn new(http: reqwest::Client, settings: Settings) -> Self {
        Self { http, settings }
    }
}

impl Provider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn display_name(&self) -> &'static str {
        "Claude (Anthropic)"
    }

    fn is_configured(&self) -> bool {
        self.settings.is_set(settings::ANTHROPIC_API_KEY)
    }

    fn stream_chat(&self, req: ChatRequest) -> ChunkStream {
        let this = self.clone();

        Box::pin(stream! {
            let Some(api_key) = this.settings.get(settings::ANTHROPIC_API_KEY) else {
                yield ChatChunk::error(ProviderError::CredentialMissing { provider: NAME }.to_string());
                return;
            };
            let base = trim_base(&this.settings.get_or(settings::ANTHROPIC_BASE_URL, DEFAULT_BASE_URL));
            let version = this.settings.get_or(settings::ANTHROPIC_VERSION, DEFAULT_VERSION);
            let url = format!("{base}/v1/messages");

            let body = MessagesRequest {
                model: this.settings.get_or(settings::ANTHROPIC_MODEL, DEFAULT_MODEL),
                stream: true,
                max_tokens: MAX_TOKENS,
                system: SYSTEM_PROMPT,
                messages: build_messages(&req),
            };

            tracing::debug!(%url, model = %body.model, turns = body.messages.len(), "starting messages stream");
            let request = this
                .http
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", version)
                .header("content-type", "application/json")
                .json(&body);

            let resp = match open_stream(NAME, request).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(error = %e, "messages request failed");
                    yield ChatChunk::error(e.to_string());
                    return;
                }
            };

            let mut chunks = Box::pin(decode_body(NAME, resp, FrameDecoder::events(), interpret));
            while let Some(chunk) = chunks.next().await {
                yield chunk;
            }
        })
    }
}

fn interpret(frame: Frame) -> Decoded {
    match frame.event.as_deref() {
        Some(CONTENT_DELTA) => {
            let Some(event) = parse_frame::<ContentBlockDelta>(NAME, &frame) else {
                return Decoded::Skip;
            };
            match event.delta.text {
                Some(text) if !text.is_empty() => Decoded::Chunk(ChatChunk::text(text)),
                _ => Decoded::Skip,
            }
        }
        Some(ERROR_EVENT) => {
            let message = serde_json::from_str::<serde_json::Value>(&frame.data)
                .ok()
                .and_then(|v| super::error::error_message(&v))
                .unwrap_or_else(|| frame.data.clone());
            Decoded::Fail(ProviderError::Upstream {
                provider: NAME,
                message,
            })
        }
        _ => Decoded::Skip,
    }
}

fn build_messages(req: &ChatRequest) -> Vec<Message> {
    let mut msgs = Vec::with_capacity(req.history.len() + 1);
    for turn in sendable(&req.history) {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        msgs.push(Message {
            role,
            content: content_for(&turn.text, turn.attachment.as_ref()),
        });
    }

    let prompt = if req.prompt.trim().is_empty() && image_of(req.attachment.as_ref()).is_none() {
        EMPTY_MESSAGE
    } else {
        req.prompt.as_str()
    };
    msgs.push(Message {
        role: "user",
        content: content_for(prompt, req.attachment.as_ref()),
    });
    msgs
}

fn content_for(text: &str, attachment: Option<&Attachment>) -> Content {
    let Some(image) = image_of(attachment) else {
        return Content::Text(text.to_string());
    };

    let mut blocks = vec![Block::Image {
        source: ImageSource {
            kind: "base64",
            media_type: image.mime_type.clone(),
            data: image.data.clone(),
        },
    }];
    if !text.is_empty() {
        blocks.push(Block::Text {
            text: text.to_string(),
        });
    }
    Content::Blocks(blocks)
}

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    stream: bool,
    max_tokens: u32,
    system: &'static str,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Blocks(Vec<Block>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Block {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Clone, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}
