//! HTTP generation backend
//!
//! Talks to any OpenAI-compatible Chat Completions endpoint. Ordinary
//! failures (network, non-success status, empty choices) come back as an
//! empty string; only a missing API key is a hard error.

use super::Generator;
use crate::config::BackendSettings;
use crate::{MemoirError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const SUMMARY_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Generator backed by a Chat Completions API
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key_env: String,
    world_info: Option<String>,
}

impl HttpGenerator {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("memoir/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key_env: settings.api_key_env.clone(),
            world_info: settings.world_info.clone(),
        })
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).map_err(|_| {
            MemoirError::Config(format!(
                "API key environment variable {} is not set",
                self.api_key_env
            ))
        })
    }

    async fn send(
        &self,
        system_prompt: Option<&str>,
        user_prompt: &str,
        max_tokens: usize,
    ) -> Result<String> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::new();
        if let Some(sys) = system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: sys.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: user_prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens,
            temperature: SUMMARY_TEMPERATURE,
            stream: false,
        };

        debug!("Sending generation request ({} bytes) to {}", user_prompt.len(), url);
        let response = match self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Generation request failed: {}", e);
                return Ok(String::new());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Generation API error {}: {}", status, extract_error_detail(&body));
            return Ok(String::new());
        }

        match response.json::<ChatResponse>().await {
            Ok(chat) => Ok(chat
                .choices
                .first()
                .map(|c| strip_think_tags(&c.message.content))
                .unwrap_or_default()),
            Err(e) => {
                warn!("Malformed generation response: {}", e);
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate_raw(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        self.send(None, prompt, max_tokens).await
    }

    async fn generate_quiet(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        self.send(self.world_info.as_deref(), prompt, max_tokens).await
    }
}

/// Drop a leading `<think>...</think>` block and surrounding whitespace
fn strip_think_tags(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("<think>") {
        if let Some(end) = rest.find("</think>") {
            return rest[end + "</think>".len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
    }
    trimmed.chars().take(500).collect()
}
