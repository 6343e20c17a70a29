//! Embedding providers.
//!
//! Two implementations of the [`Embedder`] trait:
//! - [`FakeEmbedder`]: deterministic hash-based vectors, no network.
//!   Default provider; the whole pipeline runs offline with it.
//! - [`OpenAiEmbedder`]: any OpenAI-compatible `/v1/embeddings` endpoint
//!   with batching, retry, and exponential backoff.
//!
//! Retry strategy for the HTTP provider:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::traits::Embedder;

/// Default dimensionality for the fake provider.
pub const FAKE_DIMS: usize = 64;

/// Create the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "fake" => Ok(Arc::new(FakeEmbedder::new(
            config.dims.unwrap_or(FAKE_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => bail!("unknown embedding provider: '{}'. available: fake, openai", other),
    }
}

/// Deterministic embedder derived from a SHA-256 digest of the text.
///
/// Identical texts map to identical vectors, so self-retrieval works and
/// tests are reproducible, but there is no semantic neighbourhood: only
/// exact text matches land at distance zero.
#[derive(Debug)]
pub struct FakeEmbedder {
    dims: usize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-sha256"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let digest = Sha256::digest(text.as_bytes());
                (0..self.dims)
                    .map(|i| digest[i % 32] as f32 / 255.0)
                    .collect()
            })
            .collect())
    }
}

/// Embedder for OpenAI-compatible `/v1/embeddings` endpoints.
///
/// Reads the API key from `OPENAI_API_KEY` at construction. Batches are
/// split to `batch_size` inputs per request and each request retries
/// transient failures with exponential backoff.
#[derive(Debug)]
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model is required for the openai provider")?;
        let dims = config
            .dims
            .context("embedding.dims is required for the openai provider")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings_response(&json, texts.len());
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("embeddings API error {}: {}", status, body_text));
                        continue;
                    }

                    // Other client errors are not retryable
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embeddings API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding` from an embeddings API response, restored
/// to input order via the `index` field.
fn parse_embeddings_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .context("invalid embeddings response: missing data array")?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for item in data {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(indexed.len());
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .context("invalid embeddings response: missing embedding")?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    if indexed.len() != expected {
        bail!(
            "embeddings response returned {} vectors for {} inputs",
            indexed.len(),
            expected
        );
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
