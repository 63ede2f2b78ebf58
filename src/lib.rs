//! Memoir - rolling conversation memory
//!
//! Keeps a bounded digest of a long conversation so that only a budgeted
//! amount of memory text is injected into each generation request:
//! - Summarize messages once and cache the result by content hash
//! - Promote recent summaries into a short-term window
//! - Keep remembered summaries in a long-term window
//! - React to chat lifecycle events incrementally

pub mod chat;
pub mod commands;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod memory;
pub mod reactor;
pub mod services;

pub use chat::{ChatSnapshot, ConversationStore, InMemoryChat, Message, SenderKind};
pub use commands::{parse_command, MemoryCommand};
pub use config::{BackendSettings, MemorySettings, TierSettings};
pub use engine::MemoryEngine;
pub use memory::{MemoryState, MemoryWindow, Tier};
pub use reactor::{ChatEvent, HostState, ReactorAction};
pub use services::{Generator, PromptSurface, TokenCounter};

/// Result type for Memoir operations
pub type Result<T> = std::result::Result<T, MemoirError>;

/// Errors that can occur in Memoir
#[derive(Debug, thiserror::Error)]
pub enum MemoirError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Message index {index} out of range (chat has {len} messages)")]
    InvalidIndex { index: usize, len: usize },

    #[error("No active chat")]
    NoActiveChat,

    #[error("Command error: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
