//! Completion capability.
//!
//! The pipeline only needs "text in, text out". [`CompletionClient`] is that
//! seam; [`LlmClient`] is the OpenAI-compatible implementation used by the
//! binary, and tests plug in scripted stand-ins.

use crate::config::LlmConfig;
use crate::error::{Text2SqlError, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Single-shot, synchronous-from-the-caller's-view text completion.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.1,
            max_tokens: 1500,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Text2SqlError::Config("no LLM API key configured (set OPENAI_API_KEY)".to_string()))?;

        let mut client = Self::new(api_key, config.model.clone(), config.base_url.clone());
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a careful SQL analyst. Follow the instructions in the user message exactly."},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
        });

        // Newer and reasoning models reject max_tokens
        if self.model.starts_with("gpt-4") || self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(self.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(self.max_tokens);
        }

        debug!(model = %self.model, prompt_chars = prompt.len(), "calling completion endpoint");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Text2SqlError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Text2SqlError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Text2SqlError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_message_content(&response_json)
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.call_llm(prompt).await
    }
}

/// Pulls `choices[0].message.content` out of a chat-completions payload.
fn extract_message_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(Text2SqlError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Text2SqlError::Llm("No choices array in LLM response".to_string()))?;

    let first = choices
        .first()
        .ok_or_else(|| Text2SqlError::Llm("Empty choices array in LLM response".to_string()))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(Text2SqlError::Llm("LLM response was filtered by content policy".to_string()))
        }
        _ => {}
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| Text2SqlError::Llm("No content in LLM response".to_string()))?;

    Ok(content.to_string())
}
