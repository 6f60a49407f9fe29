//! Generation model client.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Single-shot text generation. Implementations return the raw model
    /// output; callers own any cleanup (fence stripping etc.).
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Chat-completions client for an OpenAI-compatible endpoint.
pub struct OpenAiModel {
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl GenerativeModel for OpenAiModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AssistantError::Llm("No API key configured".to_string()));
        }

        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise assistant. Respond with exactly what is asked for, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AssistantError::Llm("No content in LLM response".to_string()))?;

        debug!(model = %self.model, chars = content.len(), "generation complete");
        Ok(content.to_string())
    }
}
