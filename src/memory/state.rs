//! Per-message memory state
//!
//! The host store keeps a free-form attachment map on every message. Memory
//! state lives under [`ATTACHMENT_KEY`] and is parsed into [`MemoryState`]
//! whenever it is read.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

/// Attachment key memory state is stored under
pub const ATTACHMENT_KEY: &str = "memoir";

/// Failure reason recorded when generation returns nothing
pub const GENERATION_FAILED: &str = "generation failed";

/// Injection bucket a message's summary is assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    None,
    Short,
    Long,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::None => write!(f, "none"),
            Tier::Short => write!(f, "short"),
            Tier::Long => write!(f, "long"),
        }
    }
}

/// Memory metadata attached to one message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryState {
    /// Last generated summary
    pub summary: Option<String>,

    /// Hash of the message text that produced `summary`
    pub summary_hash: Option<String>,

    /// User-set flag: bypass exclusion, eligible for long-term memory
    pub remembered: bool,

    /// Tier from the latest allocation (derived, recomputed every refresh)
    pub inclusion: Tier,

    /// Failure reason from the most recent summarization attempt
    pub last_error: Option<String>,

    pub summarized_at: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Read memory state out of a message attachment map.
    ///
    /// Malformed data is logged and treated as absent.
    pub fn from_attachments(extra: &Map<String, Value>) -> Self {
        let Some(value) = extra.get(ATTACHMENT_KEY) else {
            return Self::default();
        };

        match serde_json::from_value::<MemoryState>(value.clone()) {
            Ok(state) => state.validated(),
            Err(e) => {
                warn!("Ignoring malformed memory state: {}", e);
                Self::default()
            }
        }
    }

    /// Write memory state into a message attachment map
    pub fn write_attachments(&self, extra: &mut Map<String, Value>) -> Result<()> {
        extra.insert(ATTACHMENT_KEY.to_string(), serde_json::to_value(self)?);
        Ok(())
    }

    /// True if the cached summary was produced from exactly `text`
    pub fn is_fresh(&self, text: &str) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
            && self.summary_hash.as_deref() == Some(content_hash(text).as_str())
    }

    /// Summary that may be placed in a tier: present, fresh, and not
    /// shadowed by a failed attempt.
    pub fn usable_summary(&self, text: &str) -> Option<&str> {
        if self.last_error.is_some() || !self.is_fresh(text) {
            return None;
        }
        self.summary.as_deref()
    }

    /// Status badges for display next to the message
    pub fn status_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if let Some(error) = &self.last_error {
            labels.push(format!("Error: {}", error));
        } else {
            match self.inclusion {
                Tier::Short => labels.push("Short-term Memory".to_string()),
                Tier::Long => labels.push("Long-term Memory".to_string()),
                Tier::None => {}
            }
        }
        if self.remembered {
            labels.push("Remembered".to_string());
        }
        labels
    }

    // A tier without a summary cannot be rendered
    fn validated(mut self) -> Self {
        if self.summary.as_deref().is_some_and(str::is_empty) {
            self.summary = None;
        }
        if self.summary.is_none() {
            self.inclusion = Tier::None;
        }
        self
    }
}

/// Content hash used to detect edited messages
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
