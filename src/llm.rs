//! Language-model access.
//!
//! Everything that talks to a model goes through [`JsonCompleter`]: a prompt
//! in, one JSON object out. [`OpenAiClient`] implements it against the
//! chat-completions API. The client is built once at startup and shared via
//! `Arc`; there is no process-global instance.
//!
//! # Request strategy
//!
//! - First attempt asks for `response_format = json_object`.
//! - If that attempt is rejected with a 4xx (older models do not support the
//!   flag), it is retried once without it; the prompt itself demands JSON.
//! - Network errors, timeouts, and 5xx are returned as errors; callers route
//!   them to their fallback path.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;

/// One chat turn pair for a JSON-producing completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

#[async_trait]
pub trait JsonCompleter: Send + Sync {
    /// Returns the model's reply parsed as a JSON object.
    async fn complete_json(&self, request: &ChatRequest) -> Result<Value>;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("OPENAI_API_KEY must not be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
        })
    }

    async fn post_completion(&self, request: &ChatRequest, json_mode: bool) -> Result<Attempt> {
        let mut body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response.json().await?;
            return Ok(Attempt::Content(extract_content(&json)?));
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.is_client_error() && status.as_u16() != 401 && status.as_u16() != 429 {
            return Ok(Attempt::Rejected(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }
        bail!("OpenAI API error {}: {}", status, body_text)
    }
}

enum Attempt {
    Content(String),
    Rejected(String),
}

#[async_trait]
impl JsonCompleter for OpenAiClient {
    async fn complete_json(&self, request: &ChatRequest) -> Result<Value> {
        let content = match self.post_completion(request, true).await? {
            Attempt::Content(c) => c,
            Attempt::Rejected(reason) => {
                tracing::warn!(%reason, "json response_format rejected, retrying without it");
                match self.post_completion(request, false).await? {
                    Attempt::Content(c) => c,
                    Attempt::Rejected(reason) => bail!(reason),
                }
            }
        };

        parse_json_object(&content)
    }
}

/// Stand-in used when no API key is configured; every call fails, which
/// routes callers to their fallback path.
pub struct UnconfiguredCompleter;

#[async_trait]
impl JsonCompleter for UnconfiguredCompleter {
    async fn complete_json(&self, _request: &ChatRequest) -> Result<Value> {
        bail!("OPENAI_API_KEY not configured")
    }
}

fn extract_content(json: &Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message"))?;

    // A null content is treated as an empty object, like an empty reply.
    Ok(content.as_str().unwrap_or("{}").to_string())
}

/// Parses model output, requiring a JSON object at the top level.
///
/// Tolerates a surrounding Markdown code fence, which some models add even
/// when told not to.
pub fn parse_json_object(content: &str) -> Result<Value> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let text = if unfenced.is_empty() { "{}" } else { unfenced };

    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        bail!("Model response is not a JSON object");
    }
    Ok(value)
}
