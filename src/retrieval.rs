//! Type-weighted, deduplicated semantic ranking.
//!
//! Raw vector hits arrive chunk-grained; answers are entry-grained. The
//! scorer converts distance to similarity, weights by chunk kind
//! (question above cause above title), keeps one best hit per entry, and
//! over-fetches so deduplication still leaves `top_k` distinct entries.

use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::models::{ChunkKind, RankedResult, VectorHit};
use crate::traits::{Embedder, VectorStore};

/// Candidate count for a requested `top_k`: three hits per entry is the
/// worst case, with a floor for small values.
pub fn over_fetch(top_k: usize, cfg: &RetrievalConfig) -> usize {
    (top_k * 3).max(cfg.over_fetch_floor)
}

/// Score, weight, deduplicate, and rank raw hits.
///
/// `score = weight(kind) / (1 + max(distance, 0))`, grouped by entry
/// keeping the maximum. Exact ties keep the first-seen hit, and entries
/// with equal final scores stay in first-seen order.
pub fn rank_hits(hits: &[VectorHit], cfg: &RetrievalConfig, top_k: usize) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = Vec::new();
    let mut by_entry: HashMap<i64, usize> = HashMap::new();

    for hit in hits {
        let base = 1.0 / (1.0 + hit.distance.max(0.0));
        let weight = match hit.metadata.kind {
            ChunkKind::Q => cfg.weight_question,
            ChunkKind::C => cfg.weight_cause,
            ChunkKind::T => cfg.weight_title,
        };
        let score = base * weight;

        match by_entry.get(&hit.metadata.entry_id) {
            Some(&idx) => {
                if score > ranked[idx].score {
                    ranked[idx].score = score;
                    ranked[idx].hit_kind = hit.metadata.kind;
                }
            }
            None => {
                by_entry.insert(hit.metadata.entry_id, ranked.len());
                ranked.push(RankedResult {
                    entry_id: hit.metadata.entry_id,
                    score,
                    hit_kind: hit.metadata.kind,
                });
            }
        }
    }

    // Stable sort: equal scores keep first-seen entry order.
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}

/// Embed the query and return the ranked entries for one tenant.
pub async fn retrieve(
    embedder: &dyn Embedder,
    vectors: &dyn VectorStore,
    cfg: &RetrievalConfig,
    tenant_id: &str,
    query_text: &str,
    top_k: usize,
) -> Result<Vec<RankedResult>> {
    let embeddings = embedder.embed(&[query_text.to_string()]).await?;
    let embedding = embeddings
        .first()
        .context("embedder returned no vector for the query")?;

    let fetch_k = over_fetch(top_k, cfg);
    let hits = vectors.query(embedding, fetch_k, tenant_id).await?;
    debug!(raw_hits = hits.len(), fetch_k, tenant_id, "vector query complete");

    Ok(rank_hits(&hits, cfg, top_k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use crate::traits::VectorStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn hit(entry_id: i64, kind: ChunkKind, distance: f64) -> VectorHit {
        VectorHit {
            id: format!("default:kb:{}:{}", entry_id, kind.as_str()),
            distance,
            metadata: ChunkMetadata {
                tenant_id: "default".to_string(),
                entry_id,
                kind,
                status: "published".to_string(),
                version: 1,
                tags: vec![],
            },
        }
    }

    #[test]
    fn test_score_formula_and_weighting() {
        // distance 0 is a perfect match: base 1.0 times the kind weight
        let cfg = RetrievalConfig::default();
        let ranked = rank_hits(&[hit(1, ChunkKind::Q, 0.0)], &cfg, 10);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].score - 1.20).abs() < 1e-9);
    }

    #[test]
    fn test_negative_distance_clamped() {
        let cfg = RetrievalConfig::default();
        let ranked = rank_hits(&[hit(1, ChunkKind::C, -0.5)], &cfg, 10);
        assert!((ranked[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_question_outranks_closer_cause() {
        // Entry 1's question chunk at base 0.90 (weighted 1.08) must beat
        // entry 2's cause chunk at base 0.95, despite the larger distance.
        let cfg = RetrievalConfig::default();
        let ranked = rank_hits(
            &[
                hit(2, ChunkKind::C, 1.0 / 19.0),
                hit(1, ChunkKind::Q, 1.0 / 9.0),
            ],
            &cfg,
            10,
        );
        assert_eq!(ranked[0].entry_id, 1);
        assert!((ranked[0].score - 1.08).abs() < 1e-9);
        assert_eq!(ranked[1].entry_id, 2);
        assert!((ranked[1].score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_dedup_keeps_best_hit_per_entry() {
        let cfg = RetrievalConfig::default();
        let ranked = rank_hits(
            &[
                hit(5, ChunkKind::T, 0.2),
                hit(5, ChunkKind::Q, 0.1),
                hit(5, ChunkKind::C, 0.3),
            ],
            &cfg,
            10,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entry_id, 5);
        assert_eq!(ranked[0].hit_kind, ChunkKind::Q);
    }

    #[test]
    fn test_exact_tie_keeps_first_seen_kind() {
        // c at distance 0 and t at the distance where 0.9 * base == 1.0
        // would tie only artificially; use two equal-scoring kinds instead.
        let cfg = RetrievalConfig {
            weight_question: 1.0,
            weight_cause: 1.0,
            ..RetrievalConfig::default()
        };
        let ranked = rank_hits(
            &[hit(3, ChunkKind::C, 0.5), hit(3, ChunkKind::Q, 0.5)],
            &cfg,
            10,
        );
        assert_eq!(ranked[0].hit_kind, ChunkKind::C);
    }

    #[test]
    fn test_equal_scores_preserve_first_seen_entry_order() {
        let cfg = RetrievalConfig::default();
        let ranked = rank_hits(
            &[
                hit(9, ChunkKind::C, 0.4),
                hit(4, ChunkKind::C, 0.4),
                hit(6, ChunkKind::C, 0.4),
            ],
            &cfg,
            10,
        );
        let order: Vec<i64> = ranked.iter().map(|r| r.entry_id).collect();
        assert_eq!(order, vec![9, 4, 6]);
    }

    #[test]
    fn test_truncates_to_top_k() {
        let cfg = RetrievalConfig::default();
        let hits: Vec<VectorHit> = (0..20)
            .map(|i| hit(i, ChunkKind::Q, 0.01 * i as f64))
            .collect();
        let ranked = rank_hits(&hits, &cfg, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].entry_id, 0);
    }

    #[test]
    fn test_empty_hits_rank_empty() {
        let cfg = RetrievalConfig::default();
        assert!(rank_hits(&[], &cfg, 10).is_empty());
    }

    #[derive(Debug)]
    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        requested_top_k: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, _records: &[crate::models::VectorRecord]) -> Result<usize> {
            Ok(0)
        }
        async fn query(
            &self,
            _embedding: &[f32],
            top_k: usize,
            _tenant_id: &str,
        ) -> Result<Vec<VectorHit>> {
            *self.requested_top_k.lock().unwrap() = Some(top_k);
            Ok(vec![hit(1, ChunkKind::Q, 0.0)])
        }
        async fn delete_by_entry(&self, _tenant_id: &str, _entry_id: i64) -> Result<()> {
            Ok(())
        }
        async fn clear_collection(&self) -> Result<()> {
            Ok(())
        }
        async fn recreate_collection(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retrieve_over_fetches_before_dedup() {
        let cfg = RetrievalConfig::default();
        let store = RecordingStore::default();
        let ranked = retrieve(&FixedEmbedder, &store, &cfg, "default", "seal leak", 2)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        // 3 * top_k is under the floor of 10
        assert_eq!(*store.requested_top_k.lock().unwrap(), Some(10));

        retrieve(&FixedEmbedder, &store, &cfg, "default", "seal leak", 7)
            .await
            .unwrap();
        assert_eq!(*store.requested_top_k.lock().unwrap(), Some(21));
    }
}
