//! Deterministic services for unit tests

use crate::services::{Generator, TokenCounter};
use crate::{MemoirError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One token per whitespace-separated word; context size 1000
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn context_size(&self) -> usize {
        1000
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub quiet: bool,
}

enum Script {
    Always(String),
    Sequence(Mutex<VecDeque<String>>),
    Failing,
}

/// Generator returning scripted responses and recording every request
pub struct ScriptedGenerator {
    script: Script,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn always(response: &str) -> Self {
        Self::with_script(Script::Always(response.to_string()))
    }

    /// Responses in order, then empty strings
    pub fn sequence(responses: &[&str]) -> Self {
        let queue = responses.iter().map(|r| r.to_string()).collect();
        Self::with_script(Script::Sequence(Mutex::new(queue)))
    }

    pub fn failing() -> Self {
        Self::with_script(Script::Failing)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn respond(&self, prompt: &str, max_tokens: usize, quiet: bool) -> Result<String> {
        self.requests.lock().unwrap().push(GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens,
            quiet,
        });
        match &self.script {
            Script::Always(response) => Ok(response.clone()),
            Script::Sequence(queue) => Ok(queue.lock().unwrap().pop_front().unwrap_or_default()),
            Script::Failing => Err(MemoirError::Generation("backend unavailable".to_string())),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate_raw(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        self.respond(prompt, max_tokens, false)
    }

    async fn generate_quiet(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        self.respond(prompt, max_tokens, true)
    }
}
