//! Memory curation core
//!
//! Budgets, eligibility, the summary cache, tier allocation and rendering.
//! Everything here is synchronous except the call into the generation
//! service made by [`Summarizer`].

mod allocator;
mod budget;
mod compositor;
mod exclusion;
mod state;
mod summarizer;

#[cfg(test)]
pub(crate) mod test_support;

pub use allocator::{Allocation, InclusionAllocator};
pub use budget::{budget_for, TokenBudget};
pub use compositor::{expand_macros, format_bullets, substitute_macro, MemoryCompositor, BULLET};
pub use exclusion::{Eligibility, ExclusionFilter};
pub use state::{content_hash, MemoryState, Tier, ATTACHMENT_KEY, GENERATION_FAILED};
pub use summarizer::{SummaryOutcome, Summarizer};

/// Rendered memory for the current allocation, recomputed every refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryWindow {
    /// Bulleted short-term summaries
    pub short_memory: String,
    /// Bulleted long-term summaries
    pub long_memory: String,
    /// Short-term template with the summaries substituted
    pub short_injection: String,
    /// Long-term template with the summaries substituted
    pub long_injection: String,
}

impl MemoryWindow {
    /// Text for the memory display: long-term first, then short-term
    pub fn display(&self) -> String {
        format!("{}\n\n{}", self.long_injection, self.short_injection)
    }
}
