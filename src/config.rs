//! Memory settings
//!
//! All options have defaults, so a partial (or missing) `config.toml` is valid.
//! Settings are cloned into each operation rather than read from a global.

use crate::{MemoirError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Macro name resolved to the rendered short-term memory
pub const SHORT_MEMORY_MACRO: &str = "memoir_short_memory";

/// Macro name resolved to the rendered long-term memory
pub const LONG_MEMORY_MACRO: &str = "memoir_long_memory";

/// Default instruction sent ahead of every message to summarize
pub const DEFAULT_PROMPT: &str = r#"Summarize the given fictional narrative in a single, very short and concise statement of fact.
State only events that will need to be remembered in the future.
Include names when possible.
Response must be in the past tense.
Maintain the same point of view as the text (i.e. if the text uses "you", use "your" in the response). If an observer is unspecified, assume it is "you".
Your response must ONLY contain the summary. If there is nothing worth summarizing, do not respond."#;

pub fn default_short_template() -> String {
    format!("[Following is a list of recent events]:\n{{{{{}}}}}", SHORT_MEMORY_MACRO)
}

pub fn default_long_template() -> String {
    format!(
        "[Following is a list of events that occurred in the past]:\n{{{{{}}}}}",
        LONG_MEMORY_MACRO
    )
}

/// Where an injection is placed in the downstream prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPosition {
    #[default]
    InPrompt,
    InChat,
    BeforePrompt,
}

/// Role the injected text is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionRole {
    #[default]
    System,
    User,
    Assistant,
}

/// Budget and injection options for one memory tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    /// Fraction of the model context size this tier may use (0.0 - 1.0)
    pub context_fraction: f64,

    /// Injection template; an empty template falls back to the tier default
    pub template: String,

    pub position: InjectionPosition,
    pub depth: usize,
    pub role: InjectionRole,

    /// Whether the injected text is scanned for world info activation
    pub scan: bool,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            context_fraction: 0.1,
            template: String::new(),
            position: InjectionPosition::InPrompt,
            depth: 2,
            role: InjectionRole::System,
            scan: false,
        }
    }
}

/// Connection options for the HTTP generation backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Ambient world context added to quiet generations
    pub world_info: Option<String>,

    /// Model context size in tokens
    pub context_size: usize,

    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            world_info: None,
            context_size: 8192,
            timeout_secs: 60,
        }
    }
}

/// Settings for memory curation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Summarize automatically when messages are added or edited
    pub auto_summarize: bool,

    /// Use quiet generation, which includes world context
    pub include_world_info: bool,

    /// Summarization instruction prompt
    pub prompt: String,

    /// Block host input while a summarization pass runs
    pub block_input: bool,

    /// Minimum message token length to summarize
    pub message_length_threshold: usize,

    /// Maximum token length of a summary
    pub summary_max_tokens: usize,

    pub include_user_messages: bool,

    /// Prefix the message with the sender name in the summary prompt
    pub include_names: bool,

    pub short: TierSettings,
    pub long: TierSettings,

    /// Quiet period before a refresh fires
    pub refresh_debounce_ms: u64,

    pub backend: BackendSettings,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            auto_summarize: true,
            include_world_info: false,
            prompt: DEFAULT_PROMPT.to_string(),
            block_input: false,
            message_length_threshold: 10,
            summary_max_tokens: 20,
            include_user_messages: false,
            include_names: false,
            short: TierSettings {
                template: default_short_template(),
                ..TierSettings::default()
            },
            long: TierSettings {
                template: default_long_template(),
                ..TierSettings::default()
            },
            refresh_debounce_ms: 1000,
            backend: BackendSettings::default(),
        }
    }
}

impl MemorySettings {
    /// Default config location: `~/.memoir/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".memoir").join("config.toml"))
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: MemorySettings = toml::from_str(content)?;
        settings.normalize();
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file, falling back to defaults if it does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await?;
        let settings = Self::from_toml(&content)?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        for (name, tier) in [("short", &self.short), ("long", &self.long)] {
            if !(0.0..=1.0).contains(&tier.context_fraction) {
                return Err(MemoirError::Config(format!(
                    "{}.context_fraction must be between 0 and 1, got {}",
                    name, tier.context_fraction
                )));
            }
        }
        if self.backend.context_size == 0 {
            return Err(MemoirError::Config(
                "backend.context_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Reset the summarization prompt to the built-in default
    pub fn restore_default_prompt(&mut self) {
        self.prompt = DEFAULT_PROMPT.to_string();
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    fn normalize(&mut self) {
        if self.short.template.trim().is_empty() {
            self.short.template = default_short_template();
        }
        if self.long.template.trim().is_empty() {
            self.long.template = default_long_template();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = MemorySettings::default();
        assert!(settings.auto_summarize);
        assert!(!settings.include_user_messages);
        assert_eq!(settings.message_length_threshold, 10);
        assert_eq!(settings.summary_max_tokens, 20);
        assert_eq!(settings.short.depth, 2);
        assert!(settings.short.template.contains("{{memoir_short_memory}}"));
        assert!(settings.long.template.contains("{{memoir_long_memory}}"));
    }

    #[test]
    fn test_partial_toml() {
        let settings = MemorySettings::from_toml(
            r#"
            include_user_messages = true

            [short]
            context_fraction = 0.25

            [long]
            role = "user"
            position = "in_chat"
            "#,
        )
        .unwrap();

        assert!(settings.include_user_messages);
        assert_eq!(settings.short.context_fraction, 0.25);
        // Tier templates survive a partial table
        assert_eq!(settings.short.template, default_short_template());
        assert_eq!(settings.long.role, InjectionRole::User);
        assert_eq!(settings.long.position, InjectionPosition::InChat);
        assert_eq!(settings.prompt, DEFAULT_PROMPT);
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let err = MemorySettings::from_toml("[long]\ncontext_fraction = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("long.context_fraction"));
    }

    #[test]
    fn test_restore_default_prompt() {
        let mut settings = MemorySettings {
            prompt: "custom".to_string(),
            ..MemorySettings::default()
        };
        settings.restore_default_prompt();
        assert_eq!(settings.prompt, DEFAULT_PROMPT);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = MemorySettings::load(&dir.path().join("config.toml"))
            .await
            .unwrap();
        assert_eq!(settings, MemorySettings::default());
    }
}
