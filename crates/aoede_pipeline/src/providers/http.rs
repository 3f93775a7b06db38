//! OpenAI-compatible `/chat/completions` client.
//!
//! Works against Ollama, vLLM, llama.cpp server, or the hosted APIs; the
//! pipeline only ever needs the text of the first choice back.

use crate::llm::{GenParams, ModelClient};
use anyhow::{Context, Result};
use aoede_core::config::ModelsConfig;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpModelClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .context("Failed to build HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Client for the fast routing model.
    pub fn dispatcher(config: &ModelsConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            &config.dispatcher_model,
            config.dispatcher_timeout_secs,
        )
    }

    /// Client for the reply-writing model.
    pub fn executor(config: &ModelsConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            &config.executor_model,
            config.executor_timeout_secs,
        )
    }
}

#[async_trait::async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, system: &str, prompt: &str, params: GenParams) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("model endpoint returned {}: {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to decode completion response")?;
        extract_choice_text(&body)
    }
}

/// Text of the first choice, tolerating both string and null content.
fn extract_choice_text(body: &Value) -> Result<String> {
    let content = body["choices"][0]["message"]["content"].as_str();
    match content {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => anyhow::bail!("completion response carried no text content"),
    }
}
