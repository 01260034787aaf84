//! Streaming chat over several model providers, with web-search grounding
//! and locally persisted conversations.

pub mod app;
pub mod augment;
pub mod chat;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod paths;
pub mod provider;
pub mod search;
pub mod settings;
pub mod store;

#[cfg(feature = "tui")]
pub mod tui;
