//! External services consumed by the memory engine
//!
//! Token counting, text generation and the prompt injection surface are
//! opaque collaborators; the engine only depends on these traits.

mod http;

pub use http::HttpGenerator;

use crate::config::{InjectionPosition, InjectionRole, TierSettings};
use crate::memory::MemoryWindow;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Approximate bytes per token for context estimation
const APPROX_BYTES_PER_TOKEN: usize = 4;

/// Token counting service
pub trait TokenCounter: Send + Sync {
    /// Token length of `text`
    fn count(&self, text: &str) -> usize;

    /// Model context size in tokens
    fn context_size(&self) -> usize;
}

/// Byte-length token estimate
#[derive(Debug, Clone)]
pub struct ApproxTokenCounter {
    context_size: usize,
}

impl ApproxTokenCounter {
    pub fn new(context_size: usize) -> Self {
        Self { context_size }
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.len() / APPROX_BYTES_PER_TOKEN
    }

    fn context_size(&self) -> usize {
        self.context_size
    }
}

/// Text generation service.
///
/// An empty `Ok` string signals an ordinary failure. `Err` is reserved for
/// hard failures such as a malformed backend configuration.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate from the prompt alone
    async fn generate_raw(&self, prompt: &str, max_tokens: usize) -> Result<String>;

    /// Background generation that also sees ambient world context
    async fn generate_quiet(&self, prompt: &str, max_tokens: usize) -> Result<String>;
}

/// Placement of one injection in the downstream prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionSlot {
    pub position: InjectionPosition,
    pub depth: usize,
    pub role: InjectionRole,
    pub scan: bool,
}

impl From<&TierSettings> for InjectionSlot {
    fn from(tier: &TierSettings) -> Self {
        Self {
            position: tier.position,
            depth: tier.depth,
            role: tier.role,
            scan: tier.scan,
        }
    }
}

/// Host surfaces that receive the rendered memory
pub trait PromptSurface: Send + Sync {
    /// Set (overwrite) the injection registered under `id`
    fn set_injection(&self, id: &str, text: &str, slot: InjectionSlot);

    /// Enable or disable host input while a pass runs
    fn set_input_blocked(&self, _blocked: bool) {}

    /// Update the memory display
    fn show_memory(&self, _window: &MemoryWindow) {}
}

/// Injection recorded by [`RecordingSurface`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInjection {
    pub text: String,
    pub slot: InjectionSlot,
}

/// Surface that keeps the latest injection per id
#[derive(Debug, Default)]
pub struct RecordingSurface {
    injections: Mutex<HashMap<String, RecordedInjection>>,
    input_blocked: Mutex<bool>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn injection(&self, id: &str) -> Option<RecordedInjection> {
        self.injections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn injection_count(&self) -> usize {
        self.injections.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn input_blocked(&self) -> bool {
        *self.input_blocked.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PromptSurface for RecordingSurface {
    fn set_injection(&self, id: &str, text: &str, slot: InjectionSlot) {
        self.injections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id.to_string(),
                RecordedInjection {
                    text: text.to_string(),
                    slot,
                },
            );
    }

    fn set_input_blocked(&self, blocked: bool) {
        *self.input_blocked.lock().unwrap_or_else(|e| e.into_inner()) = blocked;
    }
}
