//! Eligibility rules for summarization and tier allocation
//!
//! Evaluated fresh on every call; settings may change between calls.

use crate::chat::Message;
use crate::config::MemorySettings;
use crate::services::TokenCounter;

/// Why a message is (or is not) eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Marked as remembered; bypasses every other rule
    Remembered,
    Eligible,
    Hidden,
    UserMessage,
    TooShort { tokens: usize, threshold: usize },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Remembered | Eligibility::Eligible)
    }
}

/// Decides whether a message takes part in memory at all
pub struct ExclusionFilter<'a> {
    settings: &'a MemorySettings,
    counter: &'a dyn TokenCounter,
}

impl<'a> ExclusionFilter<'a> {
    pub fn new(settings: &'a MemorySettings, counter: &'a dyn TokenCounter) -> Self {
        Self { settings, counter }
    }

    pub fn check(&self, message: &Message) -> Eligibility {
        if message.memory.remembered {
            return Eligibility::Remembered;
        }
        if message.is_hidden() {
            return Eligibility::Hidden;
        }
        if message.is_user() && !self.settings.include_user_messages {
            return Eligibility::UserMessage;
        }

        let tokens = self.counter.count(&message.text);
        let threshold = self.settings.message_length_threshold;
        if tokens < threshold {
            return Eligibility::TooShort { tokens, threshold };
        }

        Eligibility::Eligible
    }

    pub fn is_eligible(&self, message: &Message) -> bool {
        self.check(message).is_eligible()
    }
}
