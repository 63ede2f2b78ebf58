//! Per-message summarization with a content-addressed cache
//!
//! A message is only sent to the generation service when it is eligible and
//! its cached summary is missing, stale (text hash changed), failed, or a
//! replace is forced. Failures are recorded on the message and never raised.

use super::exclusion::ExclusionFilter;
use super::state::{content_hash, GENERATION_FAILED};
use crate::chat::Message;
use crate::config::MemorySettings;
use crate::services::{Generator, TokenCounter};
use chrono::Utc;
use tracing::{debug, error, warn};

/// Result of [`Summarizer::ensure_summarized`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Excluded; nothing was done
    Ineligible,
    /// Existing summary reused
    CacheHit,
    /// New summary stored
    Summarized,
    /// Generation failed; previous summary left in place
    Failed,
}

pub struct Summarizer<'a> {
    settings: &'a MemorySettings,
    counter: &'a dyn TokenCounter,
    generator: &'a dyn Generator,
}

impl<'a> Summarizer<'a> {
    pub fn new(
        settings: &'a MemorySettings,
        counter: &'a dyn TokenCounter,
        generator: &'a dyn Generator,
    ) -> Self {
        Self {
            settings,
            counter,
            generator,
        }
    }

    /// Instruction prompt followed by the (optionally named) message text
    pub fn build_prompt(&self, message: &Message) -> String {
        let text = if self.settings.include_names {
            format!("[{}]:\n{}", message.name, message.text)
        } else {
            message.text.clone()
        };
        format!("{}\n\nText to Summarize:\n{}", self.settings.prompt, text)
    }

    /// Make sure `message.memory` holds a summary of the current text
    pub async fn ensure_summarized(&self, message: &mut Message, force_replace: bool) -> SummaryOutcome {
        let filter = ExclusionFilter::new(self.settings, self.counter);
        if !filter.is_eligible(message) {
            return SummaryOutcome::Ineligible;
        }

        if !force_replace && message.memory.last_error.is_none() && message.memory.is_fresh(&message.text) {
            debug!(
                "Message {} already has a summary and hasn't changed since, skipping summarization.",
                message.index
            );
            return SummaryOutcome::CacheHit;
        }

        debug!("Summarizing message {}...", message.index);
        let summary = self.generate(&self.build_prompt(message)).await;

        if summary.is_empty() {
            error!("Failed to summarize message {} - generation failed.", message.index);
            message.memory.last_error = Some(GENERATION_FAILED.to_string());
            return SummaryOutcome::Failed;
        }

        debug!("Message {} summarized: {}", message.index, summary);
        message.memory.summary = Some(summary);
        message.memory.summary_hash = Some(content_hash(&message.text));
        message.memory.last_error = None;
        message.memory.summarized_at = Some(Utc::now());
        SummaryOutcome::Summarized
    }

    async fn generate(&self, prompt: &str) -> String {
        let token_size = self.counter.count(prompt);
        debug!("Summarizing text with {} tokens...", token_size);

        let context_size = self.counter.context_size();
        if token_size > context_size {
            // Best effort: the call is still attempted
            error!("Text {} exceeds context size {}.", token_size, context_size);
        }

        let max_tokens = self.settings.summary_max_tokens;
        let result = if self.settings.include_world_info {
            self.generator.generate_quiet(prompt, max_tokens).await
        } else {
            self.generator.generate_raw(prompt, max_tokens).await
        };

        match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("Generation service error: {}", e);
                String::new()
            }
        }
    }
}
