//! Web search used to ground prompts.
//!
//! Two backends are ranked: Tavily first, Serper second. Either can be
//! reached directly with a local key or through a relay that injects the
//! key itself (`{relay}/proxy/tavily`, `{relay}/proxy/serper`).

use crate::settings::{self, Settings};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const TAVILY_URL: &str = "https://api.tavily.com/search";
const SERPER_URL: &str = "https://google.serper.dev/search";
const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

pub type SearchFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Vec<SearchResult>>> + Send + 'a>>;

/// Anything that can answer a query with ranked results.
pub trait Search: Send + Sync {
    fn search<'a>(&'a self, query: &'a str, max_results: usize) -> SearchFuture<'a>;
}

/// Search that never finds anything.
#[derive(Debug, Default, Clone)]
pub struct NoSearch;

impl Search for NoSearch {
    fn search<'a>(&'a self, _query: &'a str, _max_results: usize) -> SearchFuture<'a> {
        Box::pin(async { Ok::<_, anyhow::Error>(Vec::new()) })
    }
}

#[derive(Debug, Clone)]
pub struct WebSearch {
    http: reqwest::Client,
    settings: Settings,
    tavily_url: String,
    serper_url: String,
}

impl WebSearch {
    pub fn new(http: reqwest::Client, settings: Settings) -> Self {
        Self {
            http,
            settings,
            tavily_url: TAVILY_URL.to_string(),
            serper_url: SERPER_URL.to_string(),
        }
    }

    /// Point the direct (non-relay) backends somewhere else.
    pub fn with_endpoints(mut self, tavily: impl Into<String>, serper: impl Into<String>) -> Self {
        self.tavily_url = tavily.into();
        self.serper_url = serper.into();
        self
    }

    fn relay(&self) -> Option<String> {
        self.settings
            .get(settings::SEARCH_PROXY_URL)
            .map(|u| u.trim_end_matches('/').to_string())
    }

    async fn tavily(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchResult>> {
        let (url, api_key) = match (self.relay(), self.settings.get(settings::TAVILY_API_KEY)) {
            (Some(relay), _) => (format!("{relay}/proxy/tavily"), None),
            (None, Some(key)) => (self.tavily_url.clone(), Some(key)),
            (None, None) => return Ok(Vec::new()),
        };

        let body = TavilyRequest {
            api_key,
            query,
            search_depth: "advanced",
            include_answer: false,
            include_raw_content: false,
            max_results: max_results.clamp(1, 8),
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("tavily request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("tavily: HTTP {status}"));
        }
        let data: TavilyResponse = resp.json().await.context("failed to parse tavily JSON")?;

        Ok(data
            .results
            .into_iter()
            .filter_map(|r| {
                let url = r.url?;
                let text = r.content.clone().or(r.snippet).unwrap_or_default();
                Some(SearchResult {
                    title: title_or(r.title, &url),
                    snippet: truncate(&text),
                    content: r.content,
                    url,
                })
            })
            .collect())
    }

    async fn serper(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchResult>> {
        let (url, api_key) = match (self.relay(), self.settings.get(settings::SERPER_API_KEY)) {
            (Some(relay), _) => (format!("{relay}/proxy/serper"), None),
            (None, Some(key)) => (self.serper_url.clone(), Some(key)),
            (None, None) => return Ok(Vec::new()),
        };

        let body = SerperRequest {
            q: query,
            num: max_results.clamp(1, 10),
            gl: "us",
            hl: "en",
        };
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = api_key {
            request = request.header("X-API-KEY", key);
        }
        let resp = request.send().await.context("serper request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("serper: HTTP {status}"));
        }
        let data: SerperResponse = resp.json().await.context("failed to parse serper JSON")?;

        Ok(data
            .organic
            .into_iter()
            .filter_map(|r| {
                let url = r.link?;
                Some(SearchResult {
                    title: title_or(r.title, &url),
                    snippet: truncate(r.snippet.as_deref().unwrap_or_default()),
                    content: None,
                    url,
                })
            })
            .take(max_results)
            .collect())
    }
}

impl Search for WebSearch {
    fn search<'a>(&'a self, query: &'a str, max_results: usize) -> SearchFuture<'a> {
        let max_results = max_results.max(1);
        Box::pin(async move {
            match self.tavily(query, max_results).await {
                Ok(results) if !results.is_empty() => return Ok(results),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "tavily search failed"),
            }
            match self.serper(query, max_results).await {
                Ok(results) => Ok(results),
                Err(e) => {
                    tracing::warn!(error = %e, "serper search failed");
                    Ok(Vec::new())
                }
            }
        })
    }
}

fn title_or(title: Option<String>, url: &str) -> String {
    match title {
        Some(t) if !t.trim().is_empty() => t,
        _ if !url.is_empty() => url.to_string(),
        _ => "Untitled".to_string(),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    query: &'a str,
    search_depth: &'static str,
    include_answer: bool,
    include_raw_content: bool,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
    gl: &'static str,
    hl: &'static str,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperHit>,
}

#[derive(Debug, Deserialize)]
struct SerperHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_fall_back_to_url_then_untitled() {
        assert_eq!(title_or(Some("Rust".into()), "https://r"), "Rust");
        assert_eq!(title_or(Some(" ".into()), "https://r"), "https://r");
        assert_eq!(title_or(None, ""), "Untitled");
    }

    #[test]
    fn snippets_are_truncated_by_chars() {
        let long = "é".repeat(600);
        assert_eq!(truncate(&long).chars().count(), SNIPPET_CHARS);
    }

    #[tokio::test]
    async fn no_keys_and_no_relay_means_no_results() {
        let search = WebSearch::new(reqwest::Client::new(), Settings::in_memory());
        assert!(search.search("rust", 3).await.unwrap().is_empty());
    }
}
