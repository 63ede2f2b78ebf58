//! Two-tier greedy allocation of summaries into memory windows
//!
//! Walks the log newest to oldest. Eligible messages with a usable summary
//! fill the short-term window until its cumulative rendered size exceeds the
//! short limit; the message that crosses the limit is kept (overshoot by one).
//! After that only remembered messages are considered, filling the long-term
//! window under the same policy. Allocation is recomputed from scratch on
//! every refresh.

use super::budget::TokenBudget;
use super::compositor::format_bullets;
use super::exclusion::ExclusionFilter;
use super::Tier;
use crate::chat::Message;
use crate::services::TokenCounter;
use tracing::{debug, error};

/// Tier assignment for every message of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Tier per message position
    pub tiers: Vec<Tier>,

    /// Eligible messages left out because they had no usable summary
    pub missing_summaries: Vec<usize>,

    /// Rendered token size of each window
    pub short_tokens: usize,
    pub long_tokens: usize,
}

impl Allocation {
    pub fn tier(&self, index: usize) -> Tier {
        self.tiers.get(index).copied().unwrap_or_default()
    }

    pub fn count(&self, tier: Tier) -> usize {
        self.tiers.iter().filter(|t| **t == tier).count()
    }

    /// Record the assignment on each message's memory state
    pub fn apply(&self, messages: &mut [Message]) {
        for (message, tier) in messages.iter_mut().zip(&self.tiers) {
            message.memory.inclusion = *tier;
        }
    }
}

pub struct InclusionAllocator<'a> {
    filter: &'a ExclusionFilter<'a>,
    counter: &'a dyn TokenCounter,
}

impl<'a> InclusionAllocator<'a> {
    pub fn new(filter: &'a ExclusionFilter<'a>, counter: &'a dyn TokenCounter) -> Self {
        Self { filter, counter }
    }

    pub fn allocate(&self, messages: &[Message], budget: TokenBudget) -> Allocation {
        let mut allocation = Allocation {
            tiers: vec![Tier::None; messages.len()],
            ..Allocation::default()
        };

        // Newest first; rendered oldest first when measured
        let mut short_window: Vec<&str> = Vec::new();
        let mut long_window: Vec<&str> = Vec::new();
        let mut short_limit_reached = false;
        let mut long_limit_reached = false;

        for (position, message) in messages.iter().enumerate().rev() {
            if !self.filter.is_eligible(message) {
                continue;
            }

            let Some(summary) = message.memory.usable_summary(&message.text) else {
                error!(
                    "Message {} does not have a summary, excluding it from memory injection.",
                    message.index
                );
                allocation.missing_summaries.push(message.index);
                continue;
            };

            if !short_limit_reached {
                allocation.tiers[position] = Tier::Short;
                short_window.push(summary);
                allocation.short_tokens = self.window_tokens(&short_window);
                if allocation.short_tokens > budget.short_limit {
                    debug!("Short-term limit reached at message {}", message.index);
                    short_limit_reached = true;
                }
                continue;
            }

            if !long_limit_reached && message.memory.remembered {
                allocation.tiers[position] = Tier::Long;
                long_window.push(summary);
                allocation.long_tokens = self.window_tokens(&long_window);
                if allocation.long_tokens > budget.long_limit {
                    debug!("Long-term limit reached at message {}", message.index);
                    long_limit_reached = true;
                }
            }
        }

        allocation
    }

    fn window_tokens(&self, newest_first: &[&str]) -> usize {
        self.counter
            .count(&format_bullets(newest_first.iter().rev().copied()))
    }
}
