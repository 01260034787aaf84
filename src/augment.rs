//! Prompt rewriting ahead of the provider call: optional web-search context
//! plus formatting guidelines.

use crate::conversation::WebPreview;
use crate::provider::Citation;
use crate::search::{Search, SearchResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

pub const DEFAULT_MAX_RESULTS: usize = 3;

/// Phrase the model is asked to follow when results are supplied.
pub const CITE_INSTRUCTION: &str =
    "Use these search results if they are relevant to the question, and cite sources by their number.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    Numeric,
    Inline,
    Footnote,
}

impl CitationStyle {
    fn instruction(self) -> &'static str {
        match self {
            CitationStyle::Numeric => {
                "Cite sources with numeric brackets such as [1] or [2] placed right after the claim they support."
            }
            CitationStyle::Inline => {
                "Cite sources inline in parentheses with the source title, for example (Rust Reference)."
            }
            CitationStyle::Footnote => {
                "Cite sources as footnotes: mark claims with [^1], [^2] and list the footnotes with their URLs at the end."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputDetail {
    Concise,
    Balanced,
    Verbose,
}

impl OutputDetail {
    fn instruction(self) -> &'static str {
        match self {
            OutputDetail::Concise => "Keep the answer concise: a few sentences or a short list.",
            OutputDetail::Balanced => {
                "Give a balanced answer with enough detail to be useful and no padding."
            }
            OutputDetail::Verbose => {
                "Give a thorough, detailed answer with explanations and examples where helpful."
            }
        }
    }
}

const DEEP_THINKING: &str = "Think the problem through carefully before answering and silently verify \
your reasoning and facts. Keep that reasoning hidden; present only the final answer.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentOptions {
    pub web_search: bool,
    pub max_results: usize,
    pub deep_thinking: bool,
    pub citation_style: Option<CitationStyle>,
    pub output_detail: Option<OutputDetail>,
}

impl Default for AugmentOptions {
    fn default() -> Self {
        Self {
            web_search: false,
            max_results: DEFAULT_MAX_RESULTS,
            deep_thinking: false,
            citation_style: None,
            output_detail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Augmented {
    pub prompt: String,
    pub citations: Vec<Citation>,
    pub previews: Vec<WebPreview>,
}

impl Augmented {
    fn unchanged(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            citations: Vec::new(),
            previews: Vec::new(),
        }
    }
}

/// Build the effective prompt. Search failures degrade to no context.
pub async fn augment(
    prompt: &str,
    opts: &AugmentOptions,
    search: &dyn Search,
    today: NaiveDate,
) -> Augmented {
    let mut out = Augmented::unchanged(prompt);

    if opts.web_search {
        let results = match search.search(prompt, opts.max_results).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "web search failed; sending the prompt without context");
                Vec::new()
            }
        };
        if results.is_empty() {
            tracing::debug!("web search returned nothing");
        } else {
            tracing::debug!(results = results.len(), "adding web search context");
            out.prompt = with_context(prompt, &results, today);
            out.citations = results
                .iter()
                .map(|r| Citation::new(r.title.clone(), r.url.clone()))
                .collect();
            out.previews = results
                .into_iter()
                .map(|r| WebPreview {
                    title: r.title,
                    url: r.url,
                    snippet: r.snippet,
                })
                .collect();
        }
    }

    let guidelines = guidelines(opts);
    if !guidelines.is_empty() {
        out.prompt.push_str("\n\nResponse guidelines:");
        for g in guidelines {
            out.prompt.push_str("\n- ");
            out.prompt.push_str(g);
        }
    }
    out
}

fn guidelines(opts: &AugmentOptions) -> Vec<&'static str> {
    let mut out = Vec::new();
    if opts.deep_thinking {
        out.push(DEEP_THINKING);
    }
    if let Some(style) = opts.citation_style {
        out.push(style.instruction());
    }
    if let Some(detail) = opts.output_detail {
        out.push(detail.instruction());
    }
    out
}

fn with_context(prompt: &str, results: &[SearchResult], today: NaiveDate) -> String {
    let mut block = format!(
        "Current date: {}\n\nWeb search results:\n",
        today.format("%Y-%m-%d")
    );
    for (i, r) in results.iter().enumerate() {
        // Writing to a String cannot fail.
        let _ = write!(block, "\n[{}] {}\nURL: {}\n{}\n", i + 1, r.title, r.url, r.snippet);
    }
    format!("{block}\n{CITE_INSTRUCTION}\n\nQuestion: {prompt}")
}
