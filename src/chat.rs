//! Conversation store
//!
//! The host owns the message log. The engine only reads immutable snapshots
//! of it and writes memory state back into each message's attachment map.

use crate::memory::MemoryState;
use crate::{MemoirError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Who sent a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    User,
    #[default]
    Character,
    /// System or hidden message
    System,
}

/// One message as seen by the memory engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// 0-based position in the log
    pub index: usize,
    pub name: String,
    pub sender: SenderKind,
    pub text: String,
    pub memory: MemoryState,
}

impl Message {
    pub fn new(index: usize, name: impl Into<String>, sender: SenderKind, text: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            sender,
            text: text.into(),
            memory: MemoryState::default(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.sender == SenderKind::User
    }

    pub fn is_hidden(&self) -> bool {
        self.sender == SenderKind::System
    }
}

/// Immutable view of a chat, taken once at the start of an operation
#[derive(Debug, Clone, Serialize)]
pub struct ChatSnapshot {
    pub chat_id: String,
    pub taken_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl ChatSnapshot {
    pub fn new(chat_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            chat_id: chat_id.into(),
            taken_at: Utc::now(),
            messages,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Host conversation store
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Snapshot of the active chat, or `None` if no chat is selected
    async fn snapshot(&self) -> Option<ChatSnapshot>;

    /// Id of the active chat
    async fn active_chat_id(&self) -> Option<String>;

    /// Write `message.memory` back to the stored message.
    ///
    /// Returns `false` and discards the write if the chat was switched, or
    /// the message at `message.index` no longer has the snapshot's text.
    async fn store_memory(&self, chat_id: &str, message: &Message) -> bool;
}

/// Message as persisted in a chat file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub name: String,
    #[serde(default)]
    pub sender: SenderKind,
    pub text: String,
    /// Side-channel attachments (memory state lives here)
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl StoredMessage {
    pub fn new(name: impl Into<String>, sender: SenderKind, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sender,
            text: text.into(),
            extra: Map::new(),
        }
    }
}

/// Serialized chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFile {
    pub chat_id: String,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// In-process conversation store with JSON file persistence
#[derive(Debug, Default)]
pub struct InMemoryChat {
    chat: RwLock<Option<ChatFile>>,
}

impl InMemoryChat {
    /// Store with no chat selected
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(chat: ChatFile) -> Self {
        Self {
            chat: RwLock::new(Some(chat)),
        }
    }

    /// Load a chat file; a missing file starts an empty chat named after it
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            let chat_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("chat")
                .to_string();
            info!("Starting new chat {} at {:?}", chat_id, path);
            return Ok(Self::with_chat(ChatFile {
                chat_id,
                messages: Vec::new(),
            }));
        }

        let content = fs::read_to_string(path).await?;
        let chat: ChatFile = serde_json::from_str(&content)?;
        debug!("Loaded chat {} ({} messages)", chat.chat_id, chat.messages.len());
        Ok(Self::with_chat(chat))
    }

    /// Persist the active chat
    pub async fn save(&self, path: &Path) -> Result<()> {
        let guard = self.chat.read().await;
        let chat = guard.as_ref().ok_or(MemoirError::NoActiveChat)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(chat)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!("Saved chat {} to {:?}", chat.chat_id, path);
        Ok(())
    }

    pub async fn chat_id(&self) -> Option<String> {
        self.chat.read().await.as_ref().map(|c| c.chat_id.clone())
    }

    pub async fn len(&self) -> usize {
        self.chat.read().await.as_ref().map_or(0, |c| c.messages.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Replace the active chat (or deselect with `None`)
    pub async fn switch_chat(&self, chat: Option<ChatFile>) {
        *self.chat.write().await = chat;
    }

    /// Append a message, returning its index
    pub async fn append(&self, message: StoredMessage) -> Result<usize> {
        let mut guard = self.chat.write().await;
        let chat = guard.as_mut().ok_or(MemoirError::NoActiveChat)?;
        chat.messages.push(message);
        Ok(chat.messages.len() - 1)
    }

    /// Replace the text of a message; memory state is kept and goes stale
    pub async fn edit(&self, index: usize, text: impl Into<String>) -> Result<()> {
        let mut guard = self.chat.write().await;
        let chat = guard.as_mut().ok_or(MemoirError::NoActiveChat)?;
        let len = chat.messages.len();
        let message = chat
            .messages
            .get_mut(index)
            .ok_or(MemoirError::InvalidIndex { index, len })?;
        message.text = text.into();
        Ok(())
    }

    /// Swap in an alternative response for a message
    pub async fn swipe(&self, index: usize, text: impl Into<String>) -> Result<()> {
        self.edit(index, text).await
    }

    /// Delete a message; later messages shift down by one
    pub async fn delete(&self, index: usize) -> Result<StoredMessage> {
        let mut guard = self.chat.write().await;
        let chat = guard.as_mut().ok_or(MemoirError::NoActiveChat)?;
        let len = chat.messages.len();
        if index >= len {
            return Err(MemoirError::InvalidIndex { index, len });
        }
        Ok(chat.messages.remove(index))
    }
}

#[async_trait]
impl ConversationStore for InMemoryChat {
    async fn active_chat_id(&self) -> Option<String> {
        self.chat_id().await
    }

    async fn snapshot(&self) -> Option<ChatSnapshot> {
        let guard = self.chat.read().await;
        let chat = guard.as_ref()?;
        let messages = chat
            .messages
            .iter()
            .enumerate()
            .map(|(index, stored)| Message {
                index,
                name: stored.name.clone(),
                sender: stored.sender,
                text: stored.text.clone(),
                memory: MemoryState::from_attachments(&stored.extra),
            })
            .collect();
        Some(ChatSnapshot::new(chat.chat_id.clone(), messages))
    }

    async fn store_memory(&self, chat_id: &str, message: &Message) -> bool {
        let mut guard = self.chat.write().await;
        let Some(chat) = guard.as_mut() else {
            return false;
        };
        if chat.chat_id != chat_id {
            debug!("Discarding memory update for message {}: chat switched", message.index);
            return false;
        }
        let Some(stored) = chat.messages.get_mut(message.index) else {
            debug!("Discarding memory update for message {}: deleted", message.index);
            return false;
        };
        if stored.text != message.text {
            debug!("Discarding memory update for message {}: changed", message.index);
            return false;
        }

        match message.memory.write_attachments(&mut stored.extra) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to store memory for message {}: {}", message.index, e);
                false
            }
        }
    }
}
