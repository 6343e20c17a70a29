//! Knowledge-base vector rebuilds.
//!
//! Every rebuild is delete-before-insert: an entry's stale vectors are
//! removed before new ones are written, so a blanked field or changed
//! chunk set cannot leave orphans behind. Batch rebuilds never abort on
//! an individual entry; failures are collected into the report.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::chunker::build_chunks;
use crate::config::RetrievalConfig;
use crate::models::{FailedEntry, RebuildReport, VectorRecord};
use crate::traits::{Embedder, KnowledgeStore, VectorStore, VectorStoreError};

/// Progress cadence for explicit-id batches.
pub const BATCH_LOG_EVERY: usize = 50;
/// Progress cadence for full-tenant rebuilds.
const FULL_LOG_EVERY: usize = 100;

/// Rebuild the vectors for one entry. Returns the number of chunks
/// upserted; an entry with no embeddable text clears its vectors and
/// returns 0.
pub async fn rebuild_one(
    knowledge: &dyn KnowledgeStore,
    embedder: &dyn Embedder,
    vectors: &dyn VectorStore,
    cfg: &RetrievalConfig,
    entry_id: i64,
) -> Result<usize> {
    let entry = knowledge
        .get_by_id(entry_id)
        .await?
        .with_context(|| format!("knowledge entry not found: {entry_id}"))?;

    vectors.delete_by_entry(&entry.tenant_id, entry.id).await?;

    let chunks = build_chunks(&entry, cfg.max_chunk_chars);
    if chunks.is_empty() {
        info!(entry_id, "entry has no embeddable text, vectors cleared");
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embedder
        .embed(&texts)
        .await
        .with_context(|| format!("embedding failed for entry {entry_id}"))?;
    if embeddings.len() != chunks.len() {
        bail!(
            "embedder returned {} vectors for {} chunks (entry {entry_id})",
            embeddings.len(),
            chunks.len()
        );
    }

    let records: Vec<VectorRecord> = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| VectorRecord {
            id: chunk.id,
            embedding,
            document: chunk.text,
            metadata: chunk.metadata,
        })
        .collect();

    upsert_with_recovery(vectors, &records).await
}

/// Upsert, recovering once from a dimension mismatch by recreating the
/// collection. A changed embedding model leaves the old dimensionality
/// recorded on the collection; the first conflicting write triggers the
/// recreate-and-retry. A second mismatch is fatal.
async fn upsert_with_recovery(
    vectors: &dyn VectorStore,
    records: &[VectorRecord],
) -> Result<usize> {
    match vectors.upsert(records).await {
        Ok(n) => Ok(n),
        Err(err) => match err.downcast_ref::<VectorStoreError>() {
            Some(VectorStoreError::DimensionMismatch(detail)) => {
                warn!(%detail, "dimension mismatch, recreating collection and retrying");
                vectors.recreate_collection().await?;
                vectors.upsert(records).await
            }
            _ => Err(err),
        },
    }
}

/// Rebuild a list of entries, logging progress every `log_every` items.
pub async fn rebuild_batch(
    knowledge: &dyn KnowledgeStore,
    embedder: &dyn Embedder,
    vectors: &dyn VectorStore,
    cfg: &RetrievalConfig,
    ids: &[i64],
    log_every: usize,
) -> RebuildReport {
    let mut report = RebuildReport::empty();
    report.total = ids.len();

    for (i, &entry_id) in ids.iter().enumerate() {
        match rebuild_one(knowledge, embedder, vectors, cfg, entry_id).await {
            Ok(upserted) => {
                report.success += 1;
                report.upserted_total += upserted;
            }
            Err(err) => {
                warn!(entry_id, "entry rebuild failed: {err:#}");
                report.failed.push(FailedEntry {
                    entry_id,
                    error: format!("{err:#}"),
                });
            }
        }

        let processed = i + 1;
        if log_every > 0 && processed % log_every == 0 {
            info!(processed, total = report.total, "rebuild progress");
        }
    }

    info!(
        total = report.total,
        success = report.success,
        failed = report.failed.len(),
        upserted = report.upserted_total,
        "rebuild complete"
    );
    report
}

/// Rebuild every entry for a tenant, optionally filtered by status and
/// capped by `limit`. With `clear_first` the whole collection is dropped
/// before rebuilding, for a clean reindex after an embedding change.
///
/// A tenant with no matching entries returns an empty report without
/// touching the collection, even when `clear_first` is set.
pub async fn rebuild_all(
    knowledge: &dyn KnowledgeStore,
    embedder: &dyn Embedder,
    vectors: &dyn VectorStore,
    cfg: &RetrievalConfig,
    tenant_id: &str,
    status: Option<&str>,
    limit: Option<usize>,
    clear_first: bool,
) -> Result<RebuildReport> {
    let ids = knowledge.list_ids(tenant_id, status, limit).await?;
    if ids.is_empty() {
        info!(tenant_id, "no entries to rebuild");
        return Ok(RebuildReport::empty());
    }

    if clear_first {
        info!(tenant_id, "clearing vector collection before rebuild");
        vectors.clear_collection().await?;
    }

    info!(tenant_id, entries = ids.len(), "full rebuild starting");
    Ok(rebuild_batch(knowledge, embedder, vectors, cfg, &ids, FULL_LOG_EVERY).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KnowledgeEntry, VectorHit};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn entry(id: i64) -> KnowledgeEntry {
        KnowledgeEntry {
            id,
            tenant_id: "acme".to_string(),
            title: format!("Press fault {id}"),
            question_text: "Machine stops with alarm E012".to_string(),
            cause_text: "Hydraulic pressure below threshold".to_string(),
            solution_text: "Check the pump".to_string(),
            tags: vec!["press".to_string()],
            status: "published".to_string(),
            version: 1,
            attachments: vec![],
        }
    }

    struct MapKnowledge {
        entries: HashMap<i64, KnowledgeEntry>,
    }

    #[async_trait]
    impl KnowledgeStore for MapKnowledge {
        async fn get_by_id(&self, entry_id: i64) -> Result<Option<KnowledgeEntry>> {
            Ok(self.entries.get(&entry_id).cloned())
        }
        async fn list_ids(
            &self,
            tenant_id: &str,
            _status: Option<&str>,
            limit: Option<usize>,
        ) -> Result<Vec<i64>> {
            let mut ids: Vec<i64> = self
                .entries
                .values()
                .filter(|e| e.tenant_id == tenant_id)
                .map(|e| e.id)
                .collect();
            ids.sort();
            if let Some(l) = limit {
                ids.truncate(l);
            }
            Ok(ids)
        }
        async fn count(&self, tenant_id: &str, _status: Option<&str>) -> Result<i64> {
            Ok(self
                .entries
                .values()
                .filter(|e| e.tenant_id == tenant_id)
                .count() as i64)
        }
    }

    #[derive(Debug)]
    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3, 0.4]).collect())
        }
    }

    /// Records the order of store calls and replays scripted upsert
    /// failures.
    #[derive(Default)]
    struct ScriptedStore {
        calls: Mutex<Vec<&'static str>>,
        upsert_errors: Mutex<Vec<VectorStoreError>>,
    }

    #[async_trait]
    impl VectorStore for ScriptedStore {
        async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
            self.calls.lock().unwrap().push("upsert");
            let mut errs = self.upsert_errors.lock().unwrap();
            if errs.is_empty() {
                Ok(records.len())
            } else {
                Err(anyhow::Error::new(errs.remove(0)))
            }
        }
        async fn query(
            &self,
            _embedding: &[f32],
            _top_k: usize,
            _tenant_id: &str,
        ) -> Result<Vec<VectorHit>> {
            Ok(vec![])
        }
        async fn delete_by_entry(&self, _tenant_id: &str, _entry_id: i64) -> Result<()> {
            self.calls.lock().unwrap().push("delete");
            Ok(())
        }
        async fn clear_collection(&self) -> Result<()> {
            self.calls.lock().unwrap().push("clear");
            Ok(())
        }
        async fn recreate_collection(&self) -> Result<()> {
            self.calls.lock().unwrap().push("recreate");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rebuild_one_deletes_then_upserts() {
        let knowledge = MapKnowledge {
            entries: HashMap::from([(42, entry(42))]),
        };
        let store = ScriptedStore::default();
        let cfg = RetrievalConfig::default();

        let n = rebuild_one(&knowledge, &StubEmbedder, &store, &cfg, 42)
            .await
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(*store.calls.lock().unwrap(), vec!["delete", "upsert"]);
    }

    #[tokio::test]
    async fn test_rebuild_one_unknown_entry_is_an_error() {
        let knowledge = MapKnowledge {
            entries: HashMap::new(),
        };
        let store = ScriptedStore::default();
        let cfg = RetrievalConfig::default();

        let err = rebuild_one(&knowledge, &StubEmbedder, &store, &cfg, 7)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("knowledge entry not found: 7"));
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_entry_clears_vectors_and_writes_nothing() {
        let mut blank = entry(3);
        blank.title = String::new();
        blank.question_text = String::new();
        blank.cause_text = "   ".to_string();
        let knowledge = MapKnowledge {
            entries: HashMap::from([(3, blank)]),
        };
        let store = ScriptedStore::default();
        let cfg = RetrievalConfig::default();

        let n = rebuild_one(&knowledge, &StubEmbedder, &store, &cfg, 3)
            .await
            .unwrap();

        assert_eq!(n, 0);
        assert_eq!(*store.calls.lock().unwrap(), vec!["delete"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_recreates_and_retries_once() {
        let knowledge = MapKnowledge {
            entries: HashMap::from([(1, entry(1))]),
        };
        let store = ScriptedStore::default();
        store
            .upsert_errors
            .lock()
            .unwrap()
            .push(VectorStoreError::DimensionMismatch(
                "expected 1536, got 64".to_string(),
            ));
        let cfg = RetrievalConfig::default();

        let n = rebuild_one(&knowledge, &StubEmbedder, &store, &cfg, 1)
            .await
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(
            *store.calls.lock().unwrap(),
            vec!["delete", "upsert", "recreate", "upsert"]
        );
    }

    #[tokio::test]
    async fn test_second_dimension_mismatch_is_fatal() {
        let knowledge = MapKnowledge {
            entries: HashMap::from([(1, entry(1))]),
        };
        let store = ScriptedStore::default();
        {
            let mut errs = store.upsert_errors.lock().unwrap();
            errs.push(VectorStoreError::DimensionMismatch("first".to_string()));
            errs.push(VectorStoreError::DimensionMismatch("second".to_string()));
        }
        let cfg = RetrievalConfig::default();

        let err = rebuild_one(&knowledge, &StubEmbedder, &store, &cfg, 1)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("dimension mismatch"));
        assert_eq!(
            *store.calls.lock().unwrap(),
            vec!["delete", "upsert", "recreate", "upsert"]
        );
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let knowledge = MapKnowledge {
            entries: HashMap::from([(1, entry(1)), (2, entry(2))]),
        };
        let store = ScriptedStore::default();
        let cfg = RetrievalConfig::default();

        let report =
            rebuild_batch(&knowledge, &StubEmbedder, &store, &cfg, &[1, 99, 2], 50).await;

        assert_eq!(report.total, 3);
        assert_eq!(report.success, 2);
        assert_eq!(report.upserted_total, 6);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].entry_id, 99);
        assert!(report.failed[0].error.contains("not found"));
    }

    #[tokio::test]
    async fn test_rebuild_all_empty_tenant_returns_empty_report() {
        let knowledge = MapKnowledge {
            entries: HashMap::new(),
        };
        let store = ScriptedStore::default();
        let cfg = RetrievalConfig::default();

        let report = rebuild_all(
            &knowledge,
            &StubEmbedder,
            &store,
            &cfg,
            "acme",
            None,
            None,
            true,
        )
        .await
        .unwrap();

        assert_eq!(report.total, 0);
        // nothing to rebuild: the collection is left alone even with clear_first
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_all_clears_collection_first() {
        let knowledge = MapKnowledge {
            entries: HashMap::from([(1, entry(1)), (2, entry(2))]),
        };
        let store = ScriptedStore::default();
        let cfg = RetrievalConfig::default();

        let report = rebuild_all(
            &knowledge,
            &StubEmbedder,
            &store,
            &cfg,
            "acme",
            None,
            None,
            true,
        )
        .await
        .unwrap();

        assert_eq!(report.success, 2);
        assert_eq!(store.calls.lock().unwrap()[0], "clear");
    }
}
