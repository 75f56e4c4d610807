//! LLM client adapter
//!
//! Normalizes chat-completion and embedding calls against OpenAI/Ollama-class
//! HTTP APIs. Failures are classified (timeout / rate-limit / transport /
//! malformed) so callers can decide on retry policy; this layer never
//! retries on its own.

use crate::error::{LlmFailure, Result, SageError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Chat + embedding collaborator used by pipeline stages.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 60,
        }
    }
}

pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SageError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn classify(e: &reqwest::Error) -> LlmFailure {
        if e.is_timeout() {
            LlmFailure::Timeout
        } else if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            LlmFailure::RateLimited
        } else {
            LlmFailure::Transport
        }
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.config.base_url, path))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SageError::llm(Self::classify(&e), format!("request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SageError::llm(
                LlmFailure::RateLimited,
                "provider returned 429",
            ));
        }
        if !response.status().is_success() {
            return Err(SageError::llm(
                LlmFailure::Transport,
                format!("provider returned HTTP {}", response.status()),
            ));
        }

        response.json().await.map_err(|e| {
            SageError::llm(
                LlmFailure::MalformedResponse,
                format!("invalid JSON body: {}", e),
            )
        })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": temperature,
            "max_tokens": max_tokens
        });

        debug!("Calling chat completion (model: {})", self.config.model);
        let response = self.post_json("/chat/completions", body).await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                SageError::llm(
                    LlmFailure::MalformedResponse,
                    "no content in chat completion response",
                )
            })?;

        Ok(content.to_string())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": text
        });

        let response = self.post_json("/embeddings", body).await?;

        let values = response["data"][0]["embedding"].as_array().ok_or_else(|| {
            SageError::llm(
                LlmFailure::MalformedResponse,
                "no embedding in response",
            )
        })?;

        values
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    SageError::llm(
                        LlmFailure::MalformedResponse,
                        "non-numeric value in embedding",
                    )
                })
            })
            .collect()
    }
}
