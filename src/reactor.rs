//! Mapping of host lifecycle notifications to memory actions

use crate::config::MemorySettings;
use std::fmt;

/// Host notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Chat or character changed
    ChatChanged,
    MessageDeleted,
    /// Message replaced by an alternative; a `NewMessage` follows
    MessageSwiped,
    NewMessage,
    MessageEdited,
    /// Any other notification
    Other(String),
}

impl ChatEvent {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "chat_changed" => ChatEvent::ChatChanged,
            "message_deleted" => ChatEvent::MessageDeleted,
            "message_swiped" => ChatEvent::MessageSwiped,
            "new_message" => ChatEvent::NewMessage,
            "message_edited" => ChatEvent::MessageEdited,
            other => ChatEvent::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatEvent::ChatChanged => write!(f, "chat_changed"),
            ChatEvent::MessageDeleted => write!(f, "message_deleted"),
            ChatEvent::MessageSwiped => write!(f, "message_swiped"),
            ChatEvent::NewMessage => write!(f, "new_message"),
            ChatEvent::MessageEdited => write!(f, "message_edited"),
            ChatEvent::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Host conditions checked before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostState {
    /// A response is currently streaming in
    pub streaming: bool,
    /// A conversation or character is selected
    pub chat_selected: bool,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            streaming: false,
            chat_selected: true,
        }
    }
}

/// What the engine should do for a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorAction {
    /// Drop the notification
    Ignore,
    /// Recompute allocation and rendering from cached summaries
    Refresh,
    /// Summarize the whole log, then refresh
    Summarize { replace: bool },
}

/// Decide the action for a notification
pub fn react(event: &ChatEvent, settings: &MemorySettings, host: HostState) -> ReactorAction {
    if !settings.auto_summarize {
        return ReactorAction::Refresh;
    }
    if host.streaming || !host.chat_selected {
        return ReactorAction::Ignore;
    }

    match event {
        ChatEvent::NewMessage | ChatEvent::MessageEdited => ReactorAction::Summarize { replace: false },
        ChatEvent::ChatChanged
        | ChatEvent::MessageDeleted
        | ChatEvent::MessageSwiped
        | ChatEvent::Other(_) => ReactorAction::Refresh,
    }
}
