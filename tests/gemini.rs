#![cfg(feature = "google")]

mod support;

use support::{assert_single_terminal, collect, joined, serve, Reply};
use youai::conversation::{Attachment, Turn};
use youai::provider::gemini::{GeminiProvider, FALLBACK_MODELS};
use youai::provider::{ChatRequest, Citation, Provider};
use youai::settings::{self, Settings};

fn settings_for(base: &str) -> Settings {
    let settings = Settings::in_memory();
    settings.set_transient(settings::GEMINI_BASE_URL, base);
    settings.set_transient(settings::GEMINI_API_KEY, "g-key");
    settings
}

fn request(prompt: &str) -> ChatRequest {
    ChatRequest {
        prompt: prompt.to_string(),
        attachment: None,
        history: Vec::new(),
    }
}

fn not_found() -> Reply {
    Reply::json(
        404,
        "{\"error\":{\"code\":404,\"message\":\"models/x is not found for API version v1beta\"}}",
    )
}

#[tokio::test]
async fn falls_back_through_unavailable_models() {
    let fixture = serve(vec![
        not_found(),
        not_found(),
        Reply::sse("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"from C\"}]}}]}\n\n"),
    ])
    .await;
    let p = GeminiProvider::new(reqwest::Client::new(), settings_for(&fixture.base));

    let chunks = collect(p.stream_chat(request("hi"))).await;
    assert_eq!(joined(&chunks), "from C");
    assert_single_terminal(&chunks);
    assert!(chunks.last().unwrap().is_final);

    let paths: Vec<String> = fixture
        .requests()
        .iter()
        .map(|r| r.target().to_string())
        .collect();
    assert_eq!(paths.len(), 3);
    for (path, model) in paths.iter().zip(FALLBACK_MODELS) {
        assert!(
            path.starts_with(&format!("/v1beta/models/{model}:streamGenerateContent?")),
            "{path}"
        );
        assert!(path.contains("key=g-key") && path.contains("alt=sse"), "{path}");
    }
}

#[tokio::test]
async fn configured_model_is_tried_first() {
    let fixture = serve(vec![Reply::sse(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ok\"}]}}]}\n\n",
    )])
    .await;
    let settings = settings_for(&fixture.base);
    settings.set_transient(settings::GEMINI_MODEL, "gemini-exp");
    let p = GeminiProvider::new(reqwest::Client::new(), settings);

    assert_eq!(p.candidate_models()[0], "gemini-exp");
    assert_eq!(p.candidate_models().len(), 4);

    collect(p.stream_chat(request("hi"))).await;
    assert!(fixture.requests()[0]
        .target()
        .starts_with("/v1beta/models/gemini-exp:"));
}

#[tokio::test]
async fn exhausting_every_model_is_one_error() {
    let fixture = serve(vec![not_found(), not_found(), not_found()]).await;
    let p = GeminiProvider::new(reqwest::Client::new(), settings_for(&fixture.base));

    let chunks = collect(p.stream_chat(request("hi"))).await;
    assert_eq!(chunks.len(), 1);
    let err = chunks[0].error.as_deref().unwrap();
    assert!(err.contains("gemini-1.5-flash"), "{err}");
}

#[tokio::test]
async fn other_failures_do_not_fall_back() {
    let fixture = serve(vec![Reply::json(429, "{\"error\":{\"message\":\"quota exceeded\"}}")]).await;
    let p = GeminiProvider::new(reqwest::Client::new(), settings_for(&fixture.base));

    let chunks = collect(p.stream_chat(request("hi"))).await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].error.as_deref().unwrap().contains("429"));
    assert_eq!(fixture.requests().len(), 1);
}

#[tokio::test]
async fn grounding_sources_become_citations() {
    let fixture = serve(vec![Reply::sse(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Rust 1.80 \"}]}}]}\n\n\
         data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"shipped.\"}]},\
         \"groundingMetadata\":{\"groundingChunks\":[{\"web\":{\"uri\":\"https://blog.rust-lang.org\",\"title\":\"Rust Blog\"}}]}}]}\n\n",
    )])
    .await;
    let p = GeminiProvider::new(reqwest::Client::new(), settings_for(&fixture.base));

    let mut req = request("what shipped?");
    req.history = vec![Turn::user("hello", None), Turn::assistant("hi")];
    req.attachment = Some(Attachment {
        name: "chart.jpg".into(),
        mime_type: "image/jpeg".into(),
        data: "/9j/".into(),
    });
    let chunks = collect(p.stream_chat(req)).await;

    assert_eq!(joined(&chunks), "Rust 1.80 shipped.");
    let citations: Vec<Citation> = chunks
        .iter()
        .filter_map(|c| c.citations.clone())
        .flatten()
        .collect();
    assert_eq!(citations, vec![Citation::new("Rust Blog", "https://blog.rust-lang.org")]);

    let body = fixture.requests()[0].json();
    let roles: Vec<_> = body["contents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, ["user", "model", "user"]);
    let last_parts = body["contents"][2]["parts"].as_array().unwrap();
    assert!(last_parts
        .iter()
        .any(|p| p["inlineData"]["mimeType"] == "image/jpeg"));
    assert!(body["systemInstruction"].is_object());
}

#[tokio::test]
async fn blocked_prompt_is_an_error() {
    let fixture = serve(vec![Reply::sse(
        "data: {\"promptFeedback\":{\"blockReason\":\"SAFETY\"}}\n\n",
    )])
    .await;
    let p = GeminiProvider::new(reqwest::Client::new(), settings_for(&fixture.base));

    let chunks = collect(p.stream_chat(request("hi"))).await;
    assert_single_terminal(&chunks);
    assert!(chunks[0].error.as_deref().unwrap().contains("SAFETY"));
}
