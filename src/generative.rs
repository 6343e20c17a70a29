//! Client for OpenAI-compatible chat completion endpoints.
//!
//! The generative model is strictly optional: without an API key the
//! client reports unavailable, and every network or parse failure maps
//! to `None` so callers fall through to rule-based behavior instead of
//! surfacing an error.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GenerativeConfig;
use crate::traits::GenerativeCompletion;

/// Environment variable holding the completion API key.
pub const API_KEY_ENV: &str = "FAULTDESK_GENERATIVE_API_KEY";

const TEMPERATURE: f64 = 0.3;

pub struct ChatCompletionClient {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens_cap: u32,
    client: reqwest::Client,
}

impl ChatCompletionClient {
    /// Build the client from config, reading the key from
    /// [`API_KEY_ENV`]. A missing key is not an error; the client just
    /// reports unavailable.
    pub fn new(config: &GenerativeConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens_cap: config.max_tokens,
            client,
        })
    }
}

#[async_trait]
impl GenerativeCompletion for ChatCompletionClient {
    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn chat(&self, user_text: &str, system_prompt: &str, max_tokens: u32) -> Option<String> {
        if !self.is_available() {
            debug!("generative model not configured, skipping");
            return None;
        }

        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system_prompt}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user_text}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens.min(self.max_tokens_cap),
            "temperature": TEMPERATURE,
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await;

        let response = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!("chat completion request failed: {e}");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            warn!(%status, "chat completion returned an error: {body_text}");
            return None;
        }

        let json: serde_json::Value = match response.json().await {
            Ok(j) => j,
            Err(e) => {
                warn!("chat completion returned unparseable JSON: {e}");
                return None;
            }
        };

        let content = parse_chat_response(&json);
        if content.is_none() {
            warn!("chat completion response had no usable content");
        }
        content
    }
}

/// Pull `choices[0].message.content` out of a completion response.
/// Empty or whitespace-only content counts as no answer.
fn parse_chat_response(json: &serde_json::Value) -> Option<String> {
    let content = json
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()?
        .trim();

    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
