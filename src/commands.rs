//! Slash command surface
//!
//! - `/remember [index]` marks a message as a long-term memory
//! - `/initialize_memory [replace=true]` summarizes the whole chat
//! - `/refresh_memory` recomputes the memory windows
//! - `/log_chat` dumps the chat with its memory state

use crate::{MemoirError, Result};
use std::fmt;

/// Known command names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Remember,
    InitializeMemory,
    RefreshMemory,
    LogChat,
}

impl CommandKind {
    pub fn all() -> &'static [CommandKind] {
        &[
            CommandKind::Remember,
            CommandKind::InitializeMemory,
            CommandKind::RefreshMemory,
            CommandKind::LogChat,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Remember => "remember",
            CommandKind::InitializeMemory => "initialize_memory",
            CommandKind::RefreshMemory => "refresh_memory",
            CommandKind::LogChat => "log_chat",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CommandKind::Remember => "Mark the latest chat message as a long-term memory",
            CommandKind::InitializeMemory => "Summarize all chat messages",
            CommandKind::RefreshMemory => "Recompute memory from existing summaries",
            CommandKind::LogChat => "log chat",
        }
    }

    pub fn matches(prefix: &str) -> Vec<CommandKind> {
        let prefix = prefix.to_lowercase();
        Self::all()
            .iter()
            .filter(|cmd| cmd.name().starts_with(&prefix))
            .copied()
            .collect()
    }

    pub fn parse(name: &str) -> Option<CommandKind> {
        let name = name.to_lowercase();
        Self::all().iter().find(|cmd| cmd.name() == name).copied()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// Parsed command with its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCommand {
    /// Remember a message (default: the last one)
    Remember { index: Option<usize> },
    /// Summarize every message, optionally replacing cached summaries
    Summarize { replace: bool },
    Refresh,
    LogChat,
}

/// Parse a slash command. Returns `Ok(None)` for input that is not a command.
pub fn parse_command(input: &str) -> Result<Option<MemoryCommand>> {
    let input = input.trim();
    let Some(rest) = input.strip_prefix('/') else {
        return Ok(None);
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let kind = CommandKind::parse(name)
        .ok_or_else(|| MemoirError::Command(format!("unknown command /{}", name)))?;

    let command = match kind {
        CommandKind::Remember => {
            let index = match args.as_slice() {
                [] => None,
                [raw] => Some(raw.parse::<usize>().map_err(|_| {
                    MemoirError::Command(format!("invalid message index: {}", raw))
                })?),
                _ => return Err(MemoirError::Command("/remember takes at most one index".to_string())),
            };
            MemoryCommand::Remember { index }
        }
        CommandKind::InitializeMemory => {
            let mut replace = false;
            for arg in args {
                match arg.split_once('=') {
                    Some(("replace", value)) => replace = parse_bool(value)?,
                    _ => {
                        return Err(MemoirError::Command(format!(
                            "unexpected argument to /initialize_memory: {}",
                            arg
                        )))
                    }
                }
            }
            MemoryCommand::Summarize { replace }
        }
        CommandKind::RefreshMemory => MemoryCommand::Refresh,
        CommandKind::LogChat => MemoryCommand::LogChat,
    };

    Ok(Some(command))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => Err(MemoirError::Command(format!("invalid boolean: {}", other))),
    }
}

/// Help text listing every command
pub fn help() -> String {
    CommandKind::all()
        .iter()
        .map(|cmd| format!("{:<20} {}", cmd.to_string(), cmd.description()))
        .collect::<Vec<_>>()
        .join("\n")
}
