use crate::augment::{CitationStyle, OutputDetail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// YOUAI: streaming chat with Gemini, OpenAI-compatible and Claude models
#[derive(Debug, Parser)]
#[command(name = "youai")]
#[command(version)]
#[command(about = "Streaming multi-provider AI chat", long_about = None)]
pub struct Args {
    /// Provider for this message (gemini, openai, anthropic, placeholder)
    #[arg(short = 'p', long = "provider")]
    pub provider: Option<String>,

    /// Model name for the chosen provider (this run only)
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Attach a file (images are sent to the model)
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Start a new session instead of continuing the active one
    #[arg(long = "new")]
    pub new_session: bool,

    #[command(flatten)]
    pub augment: AugmentArgs,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

/// Flags that override the `[search]` and `[augment]` config sections.
#[derive(Debug, Clone, Default, ClapArgs)]
pub struct AugmentArgs {
    /// Ground the answer in web search results
    #[arg(short = 'w', long = "web-search")]
    pub web_search: bool,

    /// Number of search results to use
    #[arg(long = "max-results", value_name = "N")]
    pub max_results: Option<usize>,

    /// Ask for careful, verified reasoning
    #[arg(long = "deep-thinking")]
    pub deep_thinking: bool,

    #[arg(long = "citation-style", value_enum, value_name = "STYLE")]
    pub citation_style: Option<CitationStyle>,

    /// How detailed the answer should be
    #[arg(long = "detail", value_enum, value_name = "LEVEL")]
    pub detail: Option<OutputDetail>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List providers and whether they have credentials
    Providers,

    /// Manage saved conversations
    Sessions {
        #[command(subcommand)]
        cmd: SessionCommand,
    },

    /// Manage stored credentials and endpoints
    Key {
        #[command(subcommand)]
        cmd: KeyCommand,
    },

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// List sessions, newest first
    List,
    /// Print a session's turns (default: the active one)
    Show { id: Option<String> },
    /// Start a new empty session and make it active
    New,
    /// Make a session active
    Switch { id: String },
    /// Rename a session
    Rename { id: String, title: Vec<String> },
    /// Delete a session
    Delete { id: String },
    /// Export a session as Markdown (or JSON)
    Export {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Search every session's text
    Search { query: Vec<String> },
}

#[derive(Debug, Subcommand)]
pub enum KeyCommand {
    /// Store a value (e.g. OPENAI_API_KEY) in the user overrides
    Set { key: String, value: String },
    /// Remove a stored value
    Unset { key: String },
    /// Show where every known key is resolved from
    Show,
}
