//! Token budgets for the memory tiers

use super::Tier;
use crate::config::MemorySettings;

/// Absolute token ceiling for a tier: `floor(context_size * fraction)`.
///
/// A fraction of 0 disables the tier. Negative fractions count as 0.
pub fn budget_for(context_size: usize, fraction: f64) -> usize {
    (context_size as f64 * fraction.max(0.0)).floor() as usize
}

/// Token ceilings for both tiers, derived on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub short_limit: usize,
    pub long_limit: usize,
}

impl TokenBudget {
    pub fn new(context_size: usize, settings: &MemorySettings) -> Self {
        Self {
            short_limit: budget_for(context_size, settings.short.context_fraction),
            long_limit: budget_for(context_size, settings.long.context_fraction),
        }
    }

    pub fn limit(&self, tier: Tier) -> usize {
        match tier {
            Tier::Short => self.short_limit,
            Tier::Long => self.long_limit,
            Tier::None => 0,
        }
    }
}
