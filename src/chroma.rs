//! Vector store backed by a Chroma server's v1 REST API.
//!
//! The collection is resolved lazily with get-or-create and its id is
//! cached. Chroma metadata values must be scalars, so chunk metadata is
//! flattened on write (tags comma-joined) and restored on read.
//! Distances follow Chroma's convention: smaller is more similar.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::VectorConfig;
use crate::models::{ChunkMetadata, VectorHit, VectorRecord};
use crate::traits::{VectorStore, VectorStoreError};

pub struct ChromaVectorStore {
    base_url: String,
    collection: String,
    client: reqwest::Client,
    collection_id: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<serde_json::Value>>>>,
}

impl ChromaVectorStore {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            client,
            collection_id: Mutex::new(None),
        })
    }

    /// Get-or-create the collection and cache its id.
    async fn ensure_collection(&self) -> Result<String> {
        let mut cached = self.collection_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let url = format!("{}/api/v1/collections", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "name": self.collection,
                "get_or_create": true,
            }))
            .send()
            .await
            .with_context(|| format!("chroma unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("chroma create collection failed ({status}): {body}");
        }

        let collection: CollectionInfo = response
            .json()
            .await
            .context("invalid chroma collection response")?;
        info!(collection = %self.collection, id = %collection.id, "chroma collection ready");

        *cached = Some(collection.id.clone());
        Ok(collection.id)
    }

    async fn post_collection(
        &self,
        action: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let collection_id = self.ensure_collection().await?;
        let url = format!(
            "{}/api/v1/collections/{}/{}",
            self.base_url, collection_id, action
        );
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("chroma unreachable at {}", self.base_url))?;
        Ok(response)
    }

    /// Drop the collection by name, tolerating a collection that does
    /// not exist yet.
    async fn drop_collection(&self) -> Result<()> {
        let url = format!("{}/api/v1/collections/{}", self.base_url, self.collection);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("chroma unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = response.text().await.unwrap_or_default();
            bail!("chroma drop collection failed ({status}): {body}");
        }

        *self.collection_id.lock().await = None;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let body = serde_json::json!({
            "ids": records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "embeddings": records.iter().map(|r| &r.embedding).collect::<Vec<_>>(),
            "documents": records.iter().map(|r| r.document.as_str()).collect::<Vec<_>>(),
            "metadatas": records.iter().map(|r| metadata_to_flat(&r.metadata)).collect::<Vec<_>>(),
        });

        let response = self.post_collection("upsert", &body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.to_lowercase().contains("dimension") {
                return Err(anyhow!(VectorStoreError::DimensionMismatch(text)));
            }
            bail!("chroma upsert failed ({status}): {text}");
        }

        debug!(count = records.len(), "chroma upsert complete");
        Ok(records.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        tenant_id: &str,
    ) -> Result<Vec<VectorHit>> {
        let body = serde_json::json!({
            "query_embeddings": [embedding],
            "n_results": top_k,
            "where": {"tenant_id": tenant_id},
            "include": ["metadatas", "distances"],
        });

        let response = self.post_collection("query", &body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chroma query failed ({status}): {text}");
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .context("invalid chroma query response")?;
        Ok(hits_from_response(parsed))
    }

    async fn delete_by_entry(&self, tenant_id: &str, entry_id: i64) -> Result<()> {
        let body = serde_json::json!({
            "where": {"$and": [
                {"tenant_id": tenant_id},
                {"entry_id": entry_id},
            ]},
        });

        let response = self.post_collection("delete", &body).await?;
        let status = response.status();
        if !status.is_success() {
            // A delete with no matches is not a failure.
            let text = response.text().await.unwrap_or_default();
            debug!(tenant_id, entry_id, "chroma delete returned {status}: {text}");
            return Ok(());
        }

        debug!(tenant_id, entry_id, "chroma delete complete");
        Ok(())
    }

    async fn clear_collection(&self) -> Result<()> {
        // An empty filter set deletes every item but keeps the collection.
        let response = self.post_collection("delete", &serde_json::json!({})).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chroma clear failed ({status}): {text}");
        }
        info!(collection = %self.collection, "chroma collection cleared");
        Ok(())
    }

    async fn recreate_collection(&self) -> Result<()> {
        self.drop_collection().await?;
        self.ensure_collection().await?;
        info!(collection = %self.collection, "chroma collection recreated");
        Ok(())
    }
}

/// Flatten chunk metadata to Chroma's scalar-only metadata map.
fn metadata_to_flat(meta: &ChunkMetadata) -> serde_json::Value {
    serde_json::json!({
        "tenant_id": meta.tenant_id,
        "entry_id": meta.entry_id,
        "kind": meta.kind.as_str(),
        "status": meta.status,
        "version": meta.version,
        "tags": meta.tags.join(","),
    })
}

/// Restore chunk metadata from a flattened map. Returns `None` when the
/// required fields are missing or malformed.
fn metadata_from_flat(value: &serde_json::Value) -> Option<ChunkMetadata> {
    let kind = crate::models::ChunkKind::parse(value.get("kind")?.as_str()?)?;
    Some(ChunkMetadata {
        tenant_id: value.get("tenant_id")?.as_str()?.to_string(),
        entry_id: value.get("entry_id")?.as_i64()?,
        kind,
        status: value
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("published")
            .to_string(),
        version: value.get("version").and_then(|v| v.as_i64()).unwrap_or(1),
        tags: value
            .get("tags")
            .and_then(|t| t.as_str())
            .map(|t| {
                t.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn hits_from_response(parsed: QueryResponse) -> Vec<VectorHit> {
    let ids = parsed.ids.into_iter().next().unwrap_or_default();
    let distances = parsed
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let metadatas = parsed
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default();

    let mut hits = Vec::with_capacity(ids.len());
    for (i, id) in ids.into_iter().enumerate() {
        let Some(meta_value) = metadatas.get(i).and_then(|m| m.as_ref()) else {
            warn!(%id, "chroma hit missing metadata, skipped");
            continue;
        };
        let Some(metadata) = metadata_from_flat(meta_value) else {
            warn!(%id, "chroma hit metadata malformed, skipped");
            continue;
        };
        hits.push(VectorHit {
            id,
            distance: distances.get(i).copied().unwrap_or(f64::MAX),
            metadata,
        });
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkKind;

    fn meta() -> ChunkMetadata {
        ChunkMetadata {
            tenant_id: "acme".to_string(),
            entry_id: 42,
            kind: ChunkKind::Q,
            status: "published".to_string(),
            version: 2,
            tags: vec!["press".to_string(), "hydraulic".to_string()],
        }
    }

    #[test]
    fn test_metadata_flatten_roundtrip() {
        let flat = metadata_to_flat(&meta());
        assert_eq!(flat["tags"], "press,hydraulic");
        assert_eq!(flat["kind"], "q");

        let restored = metadata_from_flat(&flat).unwrap();
        assert_eq!(restored.entry_id, 42);
        assert_eq!(restored.kind, ChunkKind::Q);
        assert_eq!(restored.tags, vec!["press", "hydraulic"]);
    }

    #[test]
    fn test_metadata_unknown_kind_is_rejected() {
        let mut flat = metadata_to_flat(&meta());
        flat["kind"] = serde_json::json!("x");
        assert!(metadata_from_flat(&flat).is_none());
    }

    #[test]
    fn test_hits_parse_nested_response() {
        let parsed: QueryResponse = serde_json::from_value(serde_json::json!({
            "ids": [["acme:kb:42:q", "acme:kb:7:c"]],
            "distances": [[0.12, 0.5]],
            "metadatas": [[
                {"tenant_id": "acme", "entry_id": 42, "kind": "q", "status": "published", "version": 1, "tags": ""},
                null,
            ]],
        }))
        .unwrap();

        let hits = hits_from_response(parsed);
        // the null-metadata hit is dropped
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "acme:kb:42:q");
        assert!((hits[0].distance - 0.12).abs() < 1e-9);
        assert_eq!(hits[0].metadata.entry_id, 42);
    }

    #[test]
    fn test_empty_query_response() {
        let hits = hits_from_response(QueryResponse::default());
        assert!(hits.is_empty());
    }
}
