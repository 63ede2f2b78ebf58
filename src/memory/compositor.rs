//! Rendering of the memory tiers into injection text

use super::{MemoryWindow, Tier};
use crate::chat::Message;
use crate::config::{MemorySettings, LONG_MEMORY_MACRO, SHORT_MEMORY_MACRO};
use regex::{NoExpand, Regex};
use tracing::error;

/// Marker placed before every summary line
pub const BULLET: &str = "* ";

/// Bullet each summary and join them with newlines, in the given order
pub fn format_bullets<'a>(summaries: impl IntoIterator<Item = &'a str>) -> String {
    summaries
        .into_iter()
        .map(|s| format!("{}{}", BULLET, s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace every `{{name}}` placeholder (case-insensitive, inner whitespace
/// allowed) with `value`
pub fn substitute_macro(template: &str, name: &str, value: &str) -> String {
    let pattern = format!(r"(?i)\{{\{{\s*{}\s*\}}\}}", regex::escape(name));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(template, NoExpand(value)).into_owned(),
        Err(e) => {
            error!("Invalid macro pattern for {}: {}", name, e);
            template.replace(&format!("{{{{{}}}}}", name), value)
        }
    }
}

/// Expand both memory macros in arbitrary text
pub fn expand_macros(text: &str, window: &MemoryWindow) -> String {
    let text = substitute_macro(text, SHORT_MEMORY_MACRO, &window.short_memory);
    substitute_macro(&text, LONG_MEMORY_MACRO, &window.long_memory)
}

/// Collects the summaries of one tier in conversation order
pub struct MemoryCompositor<'a> {
    messages: &'a [Message],
}

impl<'a> MemoryCompositor<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        Self { messages }
    }

    /// Summaries of `tier` between `start` and `end` (inclusive), oldest first.
    ///
    /// `start` defaults to 0 and `end` to the last message. A reversed range
    /// is logged and yields an empty string.
    pub fn concatenate(&self, start: Option<usize>, end: Option<usize>, tier: Tier) -> String {
        if self.messages.is_empty() || tier == Tier::None {
            return String::new();
        }

        let last = self.messages.len() - 1;
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(last).min(last);
        if start > end {
            error!("Cannot concatenate summaries: start index is greater than end index");
            return String::new();
        }

        let summaries = self.messages[start..=end]
            .iter()
            .filter(|m| m.memory.inclusion == tier)
            .filter_map(|m| match m.memory.summary.as_deref() {
                Some(summary) if !summary.is_empty() => Some(summary),
                _ => {
                    error!(
                        "Message {} does not have a summary, but is marked for inclusion {}",
                        m.index, tier
                    );
                    None
                }
            });
        format_bullets(summaries)
    }

    /// Full tier text
    pub fn render(&self, tier: Tier) -> String {
        self.concatenate(None, None, tier)
    }

    /// Render both tiers and place them in their templates
    pub fn compose(&self, settings: &MemorySettings) -> MemoryWindow {
        let short_memory = self.render(Tier::Short);
        let long_memory = self.render(Tier::Long);
        let short_injection = substitute_macro(&settings.short.template, SHORT_MEMORY_MACRO, &short_memory);
        let long_injection = substitute_macro(&settings.long.template, LONG_MEMORY_MACRO, &long_memory);

        MemoryWindow {
            short_memory,
            long_memory,
            short_injection,
            long_injection,
        }
    }
}
