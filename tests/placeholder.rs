mod support;

use std::time::Duration;
use support::{assert_single_terminal, collect, joined};
use youai::conversation::Attachment;
use youai::provider::placeholder::{PlaceholderProvider, SCRIPT};
use youai::provider::{ChatRequest, Provider};
use youai::settings::{self, Settings};

fn configured() -> Settings {
    let settings = Settings::in_memory();
    settings.set_transient(settings::PLACEHOLDER_API_KEY, "local");
    settings
}

fn request(prompt: &str) -> ChatRequest {
    ChatRequest {
        prompt: prompt.to_string(),
        attachment: None,
        history: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn scripted_reply_for_hi() {
    let p = PlaceholderProvider::new(configured());
    let chunks = collect(p.stream_chat(request("hi"))).await;

    let expected = format!("Placeholder received: \"hi\"{}", SCRIPT.concat());
    assert_eq!(joined(&chunks), expected);
    assert!(expected.ends_with("```rust\nprintln!(\"Hello from Placeholder!\");\n```"));

    let citations: Vec<_> = chunks.iter().filter_map(|c| c.citations.clone()).flatten().collect();
    assert_eq!(citations.len(), 2);
    assert_single_terminal(&chunks);
    assert!(chunks.last().unwrap().is_final);
}

#[tokio::test(start_paused = true)]
async fn attachment_name_is_echoed() {
    let p = PlaceholderProvider::new(configured()).with_pace(Duration::from_millis(1));
    let mut req = request("look");
    req.attachment = Some(Attachment {
        name: "notes.txt".into(),
        mime_type: "text/plain".into(),
        data: String::new(),
    });

    let text = joined(&collect(p.stream_chat(req)).await);
    assert!(text.starts_with("Placeholder received: \"look\" and file \"notes.txt\"."));
}

#[tokio::test(start_paused = true)]
async fn fragments_are_paced() {
    let p = PlaceholderProvider::new(configured());
    let started = tokio::time::Instant::now();
    collect(p.stream_chat(request("hi"))).await;
    // One pause after the echo and one after each scripted fragment.
    assert!(started.elapsed() >= Duration::from_millis(250) * (SCRIPT.len() as u32 + 1));
}

#[tokio::test]
async fn credential_is_checked_when_polled() {
    let settings = Settings::in_memory();
    let p = PlaceholderProvider::new(settings.clone()).with_pace(Duration::ZERO);
    assert!(!p.is_configured());

    let stream = p.stream_chat(request("hi"));
    settings.set_transient(settings::PLACEHOLDER_API_KEY, "late");
    let chunks = collect(stream).await;
    assert!(chunks.last().unwrap().is_final);

    let unconfigured = PlaceholderProvider::new(Settings::in_memory());
    let chunks = collect(unconfigured.stream_chat(request("hi"))).await;
    assert_eq!(
        chunks[0].error.as_deref(),
        Some("Placeholder API key is not configured.")
    );
}
