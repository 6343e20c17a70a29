//! In-memory capability implementations for tests and local runs.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Vector search is
//! brute-force over all stored vectors with distance `1 - cosine`, so
//! smaller is closer, matching the remote store's convention. The store
//! records the dimensionality of the first write and rejects conflicting
//! writes the same way the remote store does, which makes the ingest
//! self-heal testable offline.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{ChunkMetadata, KnowledgeEntry, VectorHit, VectorRecord};
use crate::traits::{KnowledgeStore, VectorStore, VectorStoreError};

struct StoredVector {
    id: String,
    embedding: Vec<f32>,
    metadata: ChunkMetadata,
}

#[derive(Default)]
pub struct MemoryVectorStore {
    vectors: RwLock<Vec<StoredVector>>,
    dims: RwLock<Option<usize>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        {
            let mut dims = self.dims.write().unwrap();
            let expected = dims.unwrap_or(records[0].embedding.len());
            for record in records {
                if record.embedding.len() != expected {
                    return Err(anyhow!(VectorStoreError::DimensionMismatch(format!(
                        "expected {}, got {} for '{}'",
                        expected,
                        record.embedding.len(),
                        record.id
                    ))));
                }
            }
            *dims = Some(expected);
        }

        let ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let mut vectors = self.vectors.write().unwrap();
        vectors.retain(|v| !ids.contains(v.id.as_str()));
        for record in records {
            vectors.push(StoredVector {
                id: record.id.clone(),
                embedding: record.embedding.clone(),
                metadata: record.metadata.clone(),
            });
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        tenant_id: &str,
    ) -> Result<Vec<VectorHit>> {
        let vectors = self.vectors.read().unwrap();
        let mut hits: Vec<VectorHit> = vectors
            .iter()
            .filter(|v| v.metadata.tenant_id == tenant_id)
            .map(|v| VectorHit {
                id: v.id.clone(),
                distance: 1.0 - cosine_sim(embedding, &v.embedding) as f64,
                metadata: v.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_entry(&self, tenant_id: &str, entry_id: i64) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.retain(|v| !(v.metadata.tenant_id == tenant_id && v.metadata.entry_id == entry_id));
        Ok(())
    }

    async fn clear_collection(&self) -> Result<()> {
        // Keeps the recorded dimensionality, like clearing a remote
        // collection without dropping it.
        self.vectors.write().unwrap().clear();
        Ok(())
    }

    async fn recreate_collection(&self) -> Result<()> {
        self.vectors.write().unwrap().clear();
        *self.dims.write().unwrap() = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKnowledgeStore {
    entries: RwLock<HashMap<i64, KnowledgeEntry>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: KnowledgeEntry) {
        self.entries.write().unwrap().insert(entry.id, entry);
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn get_by_id(&self, entry_id: i64) -> Result<Option<KnowledgeEntry>> {
        Ok(self.entries.read().unwrap().get(&entry_id).cloned())
    }

    async fn list_ids(
        &self,
        tenant_id: &str,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<i64>> {
        let entries = self.entries.read().unwrap();
        let mut ids: Vec<i64> = entries
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        if let Some(l) = limit {
            ids.truncate(l);
        }
        Ok(ids)
    }

    async fn count(&self, tenant_id: &str, status: Option<&str>) -> Result<i64> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkKind;

    fn record(id: &str, entry_id: i64, tenant: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding,
            document: "text".to_string(),
            metadata: ChunkMetadata {
                tenant_id: tenant.to_string(),
                entry_id,
                kind: ChunkKind::Q,
                status: "published".to_string(),
                version: 1,
                tags: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_distance_and_filters_tenant() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[
                record("a:kb:1:q", 1, "acme", vec![1.0, 0.0]),
                record("a:kb:2:q", 2, "acme", vec![0.0, 1.0]),
                record("o:kb:3:q", 3, "other", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 10, "acme").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a:kb:1:q");
        assert!(hits[0].distance < 1e-6);
        assert!((hits[1].distance - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[record("a:kb:1:q", 1, "acme", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(&[record("a:kb:1:q", 1, "acme", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let hits = store.query(&[0.0, 1.0], 10, "acme").await.unwrap();
        assert!(hits[0].distance < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_downcastable() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[record("a:kb:1:q", 1, "acme", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = store
            .upsert(&[record("a:kb:2:q", 2, "acme", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<VectorStoreError>(),
            Some(VectorStoreError::DimensionMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_recreate_releases_dimensionality_but_clear_keeps_it() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[record("a:kb:1:q", 1, "acme", vec![1.0, 0.0])])
            .await
            .unwrap();

        store.clear_collection().await.unwrap();
        assert!(store.is_empty());
        assert!(store
            .upsert(&[record("a:kb:1:q", 1, "acme", vec![1.0, 0.0, 0.0])])
            .await
            .is_err());

        store.recreate_collection().await.unwrap();
        assert!(store
            .upsert(&[record("a:kb:1:q", 1, "acme", vec![1.0, 0.0, 0.0])])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delete_by_entry_is_scoped() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[
                record("a:kb:1:q", 1, "acme", vec![1.0, 0.0]),
                record("a:kb:1:c", 1, "acme", vec![0.9, 0.1]),
                record("a:kb:2:q", 2, "acme", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        store.delete_by_entry("acme", 1).await.unwrap();
        assert_eq!(store.len(), 1);

        // other tenant's entry 2 untouched by a scoped delete
        store.delete_by_entry("other", 2).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_knowledge_store_filters() {
        let store = MemoryKnowledgeStore::new();
        for (id, tenant, status) in [
            (1, "acme", "published"),
            (2, "acme", "draft"),
            (3, "other", "published"),
        ] {
            store.insert(KnowledgeEntry {
                id,
                tenant_id: tenant.to_string(),
                title: format!("Entry {id}"),
                question_text: String::new(),
                cause_text: String::new(),
                solution_text: String::new(),
                tags: vec![],
                status: status.to_string(),
                version: 1,
                attachments: vec![],
            });
        }

        assert_eq!(store.list_ids("acme", None, None).await.unwrap(), vec![1, 2]);
        assert_eq!(
            store.list_ids("acme", Some("published"), None).await.unwrap(),
            vec![1]
        );
        assert_eq!(store.count("other", None).await.unwrap(), 1);
        assert!(store.get_by_id(3).await.unwrap().is_some());
        assert!(store.get_by_id(99).await.unwrap().is_none());
    }
}
