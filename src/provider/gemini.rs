use super::frame::{Frame, FrameDecoder};
use super::{
    decode_body, image_of, open_stream, parse_frame, sendable, ChatChunk, ChatRequest, Citation,
    ChunkStream, Decoded, Provider, ProviderError, ProviderId, EMPTY_MESSAGE, SYSTEM_PROMPT,
};
use crate::conversation::{Attachment, Role};
use crate::settings::{self, Settings};
use async_stream::stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

const NAME: &str = ProviderId::Gemini.label();
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/";

/// Known-good models tried after the configured one.
pub const FALLBACK_MODELS: [&str; 3] = ["gemini-2.5-flash", "gemini-2.0-flash", "gemini-1.5-flash"];

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    settings: Settings,
}

#[derive(Debug, Clone)]
pub enum GeminiAuth {
    ApiKey(String),
    BearerToken(String),
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, settings: Settings) -> Self {
        Self { http, settings }
    }

    fn auth(&self) -> Option<GeminiAuth> {
        self.settings
            .get(settings::GEMINI_API_KEY)
            .map(GeminiAuth::ApiKey)
            .or_else(|| {
                self.settings
                    .get(settings::GEMINI_ACCESS_TOKEN)
                    .map(GeminiAuth::BearerToken)
            })
    }

    /// Configured model first, then the fallbacks, without repeats.
    pub fn candidate_models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        let configured = self.settings.get(settings::GEMINI_MODEL);
        for m in configured.into_iter().chain(FALLBACK_MODELS.iter().map(|m| m.to_string())) {
            if !models.contains(&m) {
                models.push(m);
            }
        }
        models
    }

    fn build_url(&self, auth: &GeminiAuth, model: &str) -> Result<Url, ProviderError> {
        let base = self.settings.get_or(settings::GEMINI_BASE_URL, DEFAULT_BASE_URL);
        let base = if base.ends_with('/') { base } else { format!("{base}/") };

        // v1beta:streamGenerateContent supports Server-Sent Events with alt=sse.
        // Docs: https://ai.google.dev/api/rest/v1beta/models/streamGenerateContent
        let mut url = Url::parse(&base)
            .and_then(|b| b.join(&format!("v1beta/models/{model}:streamGenerateContent")))
            .map_err(|e| ProviderError::network(NAME, e))?;

        match auth {
            GeminiAuth::ApiKey(key) => {
                url.query_pairs_mut().append_pair("key", key);
            }
            GeminiAuth::BearerToken(_) => {
                // OAuth uses Authorization header.
            }
        }

        url.query_pairs_mut().append_pair("alt", "sse");
        Ok(url)
    }

    fn headers(auth: &GeminiAuth) -> Result<HeaderMap, ProviderError> {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let GeminiAuth::BearerToken(tok) = auth {
            let v = HeaderValue::from_str(&format!("Bearer {tok}"))
                .map_err(|e| ProviderError::network(NAME, e))?;
            h.insert(AUTHORIZATION, v);
        }
        Ok(h)
    }

    async fn open(
        &self,
        auth: &GeminiAuth,
        model: &str,
        body: &StreamGenerateContentRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.build_url(auth, model)?;
        let headers = Self::headers(auth)?;
        let request = self.http.post(url).headers(headers).json(body);
        open_stream(NAME, request).await
    }
}

impl Provider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn display_name(&self) -> &'static str {
        "Gemini (Flash)"
    }

    fn is_configured(&self) -> bool {
        self.auth().is_some()
    }

    fn stream_chat(&self, req: ChatRequest) -> ChunkStream {
        let this = self.clone();

        Box::pin(stream! {
            let Some(auth) = this.auth() else {
                yield ChatChunk::error(ProviderError::CredentialMissing { provider: NAME }.to_string());
                return;
            };
            let body = build_request(&req);
            let candidates = this.candidate_models();

            let mut opened = None;
            let mut last_err = None;
            for model in &candidates {
                tracing::debug!(%model, "opening Gemini stream");
                match this.open(&auth, model, &body).await {
                    Ok(resp) => {
                        opened = Some(resp);
                        break;
                    }
                    Err(e) if e.is_model_unavailable() => {
                        tracing::warn!(%model, error = %e, "model unavailable, trying next candidate");
                        last_err = Some(e);
                    }
                    Err(e) => {
                        tracing::warn!(%model, error = %e, "Gemini request failed");
                        yield ChatChunk::error(e.to_string());
                        return;
                    }
                }
            }

            let Some(resp) = opened else {
                let last = last_err.unwrap_or_else(|| ProviderError::Upstream {
                    provider: NAME,
                    message: "no candidate models".to_string(),
                });
                let err = ProviderError::ModelsExhausted {
                    provider: NAME,
                    tried: candidates.join(", "),
                    last: Box::new(last),
                };
                yield ChatChunk::error(err.to_string());
                return;
            };

            let mut chunks = Box::pin(decode_body(NAME, resp, FrameDecoder::events(), interpret));
            while let Some(chunk) = chunks.next().await {
                yield chunk;
            }
        })
    }
}

fn interpret(frame: Frame) -> Decoded {
    // Gemini uses JSON always; there is no [DONE] sentinel.
    if frame.data.trim().is_empty() {
        return Decoded::Skip;
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

    let r: StreamGenerateContentResponse = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unrecognised Gemini frame");
            return Decoded::Skip;
        }
    };
    if let Some(reason) = r.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
        return Decoded::Fail(ProviderError::Upstream {
            provider: NAME,
            message: format!("response blocked ({reason})"),
        });
    }

    let chunk = ChatChunk {
        text: extract_text(&r),
        citations: extract_citations(&r),
        ..Default::default()
    };
    if chunk.text.is_none() && chunk.citations.is_none() {
        Decoded::Skip
    } else {
        Decoded::Chunk(chunk)
    }
}

fn extract_text(r: &StreamGenerateContentResponse) -> Option<String> {
    // Concatenate all text parts of the first candidate.
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in &content.parts {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

fn extract_citations(r: &StreamGenerateContentResponse) -> Option<Vec<Citation>> {
    let meta = r.candidates.first()?.grounding_metadata.as_ref()?;
    let citations: Vec<Citation> = meta
        .grounding_chunks
        .iter()
        .filter_map(|c| c.web.as_ref())
        .filter_map(|w| {
            let uri = w.uri.clone()?;
            let title = w.title.clone().unwrap_or_else(|| uri.clone());
            Some(Citation { title, uri })
        })
        .collect();
    if citations.is_empty() { None } else { Some(citations) }
}

fn build_request(req: &ChatRequest) -> StreamGenerateContentRequest {
    let mut contents: Vec<Content> = sendable(&req.history)
        .map(|turn| Content {
            role: Some(
                match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_string(),
            ),
            parts: parts_for(&turn.text, turn.attachment.as_ref()),
        })
        .filter(|c| !c.parts.is_empty())
        .collect();

    let mut parts = parts_for(&req.prompt, req.attachment.as_ref());
    if parts.is_empty() {
        parts.push(Part::text(EMPTY_MESSAGE));
    }
    contents.push(Content {
        role: Some("user".to_string()),
        parts,
    });

    StreamGenerateContentRequest {
        contents,
        system_instruction: Content {
            role: None,
            parts: vec![Part::text(SYSTEM_PROMPT)],
        },
        generation_config: GenerationConfig {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 64,
        },
        safety_settings: [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category,
            threshold: "BLOCK_MEDIUM_AND_ABOVE",
        })
        .collect(),
    }
}

fn parts_for(text: &str, attachment: Option<&Attachment>) -> Vec<Part> {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(Part::text(text));
    }
    if let Some(image) = image_of(attachment) {
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            }),
        });
    }
    parts
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamGenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Clone, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamGenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
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
    fn candidates_are_deduplicated_in_order() {
        let settings = Settings::in_memory();
        let p = GeminiProvider::new(reqwest::Client::new(), settings.clone());
        assert_eq!(p.candidate_models(), FALLBACK_MODELS.to_vec());

        settings.set_transient(settings::GEMINI_MODEL, "gemini-2.0-flash");
        assert_eq!(
            p.candidate_models(),
            vec!["gemini-2.0-flash", "gemini-2.5-flash", "gemini-1.5-flash"]
        );
    }

    #[test]
    fn api_key_goes_in_query_and_token_in_header() {
        let p = GeminiProvider::new(reqwest::Client::new(), Settings::in_memory());
        let url = p
            .build_url(&GeminiAuth::ApiKey("k1".into()), "gemini-2.5-flash")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?key=k1&alt=sse"
        );

        let headers = GeminiProvider::headers(&GeminiAuth::BearerToken("t0".into())).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer t0");
    }

    #[test]
    fn frames_yield_text_and_grounding_citations() {
        let out = interpret(frame(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Rust "},{"text":"is fast."}]},
                "groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://rust-lang.org","title":"Rust"}},{"retrievedContext":{}}]}}]}"#,
        ));
        match out {
            Decoded::Chunk(c) => {
                assert_eq!(c.text.as_deref(), Some("Rust is fast."));
                assert_eq!(c.citations, Some(vec![Citation::new("Rust", "https://rust-lang.org")]));
                assert!(!c.is_final);
            }
            _ => panic!("expected a chunk"),
        }

        assert!(matches!(interpret(frame(r#"{"candidates":[]}"#)), Decoded::Skip));
        assert!(matches!(interpret(frame("garbage")), Decoded::Skip));
    }

    #[test]
    fn blocked_prompt_and_error_frames_fail() {
        let blocked = interpret(frame(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#));
        assert!(matches!(blocked, Decoded::Fail(e) if e.to_string().contains("SAFETY")));

        let err = interpret(frame(r#"{"error":{"code":500,"message":"internal"}}"#));
        assert!(matches!(err, Decoded::Fail(e) if e.to_string() == "Gemini error: internal"));
    }

    #[test]
    fn request_maps_roles_and_images() {
        let req = ChatRequest {
            prompt: String::new(),
            attachment: Some(Attachment {
                name: "notes.pdf".into(),
                mime_type: "application/pdf".into(),
                data: "JVBE".into(),
            }),
            history: vec![Turn::user("hi", None), Turn::assistant("hello")],
        };
        let value = serde_json::to_value(build_request(&req)).unwrap();
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        // PDF is dropped, leaving the empty-message stand-in.
        assert_eq!(value["contents"][2]["parts"][0]["text"], EMPTY_MESSAGE);
        assert_eq!(value["generationConfig"]["topK"], 64);
        assert_eq!(value["safetySettings"].as_array().unwrap().len(), 4);
        assert!(value["systemInstruction"].get("role").is_none());
    }
}
