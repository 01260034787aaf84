//! OpenAI-compatible chat completions, streamed as `data:` JSON lines.
//!
//! Works against any gateway speaking the same protocol (OpenAI, Groq,
//! OpenRouter, DeepSeek, ...) by pointing `OPENAI_BASE_URL` at it.

use super::frame::{Frame, FrameDecoder};
use super::{
    decode_body, image_of, open_stream, parse_frame, sendable, trim_base, ChatChunk, ChatRequest,
    ChunkStream, Decoded, Provider, ProviderError, ProviderId, EMPTY_MESSAGE, SYSTEM_PROMPT,
};
use crate::conversation::{Attachment, Role};
use crate::settings::{self, Settings};
use async_stream::stream;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

const NAME: &str = ProviderId::OpenAi.label();
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    settings: Settings,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, settings: Settings) -> Self {
        Self { http, settings }
    }

    fn build_body(&self, req: &ChatRequest) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.get_or(settings::OPENAI_MODEL, DEFAULT_MODEL),
            stream: true,
            messages: build_messages(req),
            temperature: 0.7,
        }
    }
}

impl Provider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn display_name(&self) -> &'static str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.settings.is_set(settings::OPENAI_API_KEY)
    }

    fn stream_chat(&self, req: ChatRequest) -> ChunkStream {
        let this = self.clone();

        Box::pin(stream! {
            let Some(api_key) = this.settings.get(settings::OPENAI_API_KEY) else {
                yield ChatChunk::error(ProviderError::CredentialMissing { provider: NAME }.to_string());
                return;
            };
            let base = trim_base(&this.settings.get_or(settings::OPENAI_BASE_URL, DEFAULT_BASE_URL));
            let url = format!("{base}/chat/completions");
            let body = this.build_body(&req);

            let auth = match HeaderValue::from_str(&format!("Bearer {api_key}")) {
                Ok(v) => v,
                Err(e) => {
                    yield ChatChunk::error(ProviderError::network(NAME, e).to_string());
                    return;
                }
            };

            tracing::debug!(%url, model = %body.model, turns = body.messages.len(), "starting completion stream");
            let request = this
                .http
                .post(&url)
                .header(AUTHORIZATION, auth)
                .header(CONTENT_TYPE, "application/json")
                .json(&body);

            let resp = match open_stream(NAME, request).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(error = %e, "completion request failed");
                    yield ChatChunk::error(e.to_string());
                    return;
                }
            };

            let mut chunks = Box::pin(decode_body(NAME, resp, FrameDecoder::lines(), interpret));
            while let Some(chunk) = chunks.next().await {
                yield chunk;
            }
        })
    }
}

fn interpret(frame: Frame) -> Decoded {
    if frame.data.trim() == DONE_SENTINEL {
        return Decoded::Done;
    }

    let Some(value) = parse_frame::<serde_json::Value>(NAME, &frame) else {
        return Decoded::Skip;
    };
    if let Some(message) = super::error::error_message(&value) {
        return Decoded::Fail(ProviderError::Upstream {
            provider: NAME,
            message,
        });
    }

    let chunk: CompletionChunk = match serde_json::from_value(value) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unrecognised completion chunk");
            return Decoded::Skip;
        }
    };
    match extract_text(&chunk) {
        Some(text) => Decoded::Chunk(ChatChunk::text(text)),
        None => Decoded::Skip,
    }
}

fn extract_text(chunk: &CompletionChunk) -> Option<String> {
    let choice = chunk.choices.first()?;
    let text = choice
        .delta
        .as_ref()
        .and_then(|d| d.content.clone())
        .or_else(|| choice.text.clone())?;
    (!text.is_empty()).then_some(text)
}

fn build_messages(req: &ChatRequest) -> Vec<Message> {
    let mut msgs = vec![Message {
        role: "system",
        content: Content::Text(SYSTEM_PROMPT.to_string()),
    }];

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

    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });
    }
    parts.push(ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:{};base64,{}", image.mime_type, image.data),
        },
    });
    Content::Parts(parts)
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest {
    model: String,
    stream: bool,
    messages: Vec<Message>,
    temperature: f32,
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
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;

    fn frame(data: &str) -> Frame {
        Frame {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn interprets_delta_legacy_text_and_sentinel() {
        let delta = interpret(frame(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#));
        assert!(matches!(delta, Decoded::Chunk(c) if c.text.as_deref() == Some("Hel")));

        let legacy = interpret(frame(r#"{"choices":[{"text":"lo"}]}"#));
        assert!(matches!(legacy, Decoded::Chunk(c) if c.text.as_deref() == Some("lo")));

        assert!(matches!(interpret(frame(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#)), Decoded::Skip));
        assert!(matches!(interpret(frame("{not json")), Decoded::Skip));
        assert!(matches!(interpret(frame("[DONE]")), Decoded::Done));
    }

    #[test]
    fn error_payload_is_terminal() {
        let out = interpret(frame(r#"{"error":{"message":"context length exceeded"}}"#));
        match out {
            Decoded::Fail(e) => assert_eq!(
                e.to_string(),
                "OpenAI-compatible error: context length exceeded"
            ),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn messages_carry_system_history_and_inline_images() {
        let image = Attachment {
            name: "cat.png".into(),
            mime_type: "image/png".into(),
            data: "aGk=".into(),
        };
        let req = ChatRequest {
            prompt: "and this one?".into(),
            attachment: Some(image.clone()),
            history: vec![
                Turn::user("look", Some(image)),
                Turn::assistant(""),
                Turn::assistant("a cat"),
            ],
        };

        let value = serde_json::to_value(build_messages(&req)).unwrap();
        let msgs = value.as_array().unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["content"][0]["type"], "text");
        assert_eq!(msgs[1]["content"][1]["image_url"]["url"], "data:image/png;base64,aGk=");
        assert_eq!(msgs[2]["role"], "assistant");
        assert_eq!(msgs[2]["content"], "a cat");
        assert_eq!(msgs[3]["content"][0]["text"], "and this one?");
    }

    #[test]
    fn empty_prompt_is_replaced() {
        let req = ChatRequest {
            prompt: "  ".into(),
            attachment: None,
            history: Vec::new(),
        };
        let msgs = build_messages(&req);
        assert!(matches!(&msgs[1].content, Content::Text(t) if t == EMPTY_MESSAGE));
    }
}
