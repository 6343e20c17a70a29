//! Capability interfaces consumed by the pipeline.
//!
//! Every external collaborator sits behind one of these traits so the
//! pipeline can be wired against HTTP-backed clients in production and
//! in-memory implementations in tests:
//!
//! - [`Embedder`]: text batches to vectors, order-preserving.
//! - [`VectorStore`]: upsert/query/delete over embedded chunks.
//! - [`KnowledgeStore`]: read-only access to authored entries.
//! - [`LegacySearch`]: keyword search against the legacy backend.
//! - [`GenerativeCompletion`]: chat completions; absorbs its own errors.
//! - [`AuditSink`]: fire-and-forget conversation/decision logging.
//!
//! Handles are constructed once at process start and shared as
//! `Arc<dyn ...>`; none of them hold mutable state visible to callers.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    IntentDecision, KnowledgeEntry, LegacyPage, RetrievedDoc, VectorHit, VectorRecord,
};

/// Upsert failure kinds callers branch on.
///
/// Wrapped in `anyhow::Error` by implementations; the ingest
/// orchestrator downcasts to decide whether to run the
/// recreate-and-retry self-heal.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("embedding dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Legacy backend failure kinds.
///
/// The fallback chain needs to distinguish connection failures from
/// upstream HTTP errors: without a generative fallback the former
/// surfaces as 503 and the latter as 502.
#[derive(Debug, Error)]
pub enum LegacySearchError {
    #[error("failed to connect to knowledge backend: {0}")]
    Connect(String),
    #[error("knowledge backend timed out: {0}")]
    Timeout(String),
    #[error("knowledge backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("knowledge backend request failed: {0}")]
    Other(String),
}

/// Turns text into embedding vectors.
#[async_trait]
pub trait Embedder: std::fmt::Debug + Send + Sync {
    /// Model identifier for logs (e.g. `"text-embedding-3-small"`, `"fake"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality produced by this embedder.
    fn dims(&self) -> usize;

    /// Embed a batch of texts. Output order matches input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Stores and queries embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite a batch of records. Returns the count written.
    ///
    /// A dimensionality conflict with the existing collection must be
    /// reported as [`VectorStoreError::DimensionMismatch`].
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize>;

    /// Nearest-neighbour query filtered to one tenant.
    /// Smaller distance means more similar.
    async fn query(&self, embedding: &[f32], top_k: usize, tenant_id: &str)
        -> Result<Vec<VectorHit>>;

    /// Delete all chunks belonging to one entry. Idempotent: deleting an
    /// entry with no stored chunks succeeds.
    async fn delete_by_entry(&self, tenant_id: &str, entry_id: i64) -> Result<()>;

    /// Remove every vector in the collection. Destructive.
    async fn clear_collection(&self) -> Result<()>;

    /// Drop and recreate the collection empty, releasing any recorded
    /// dimensionality. Used by the ingest self-heal after a
    /// [`VectorStoreError::DimensionMismatch`].
    async fn recreate_collection(&self) -> Result<()>;
}

/// Read-only access to authored knowledge entries.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn get_by_id(&self, entry_id: i64) -> Result<Option<KnowledgeEntry>>;

    /// Entry ids for a tenant, optionally filtered by status and capped.
    async fn list_ids(
        &self,
        tenant_id: &str,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<i64>>;

    async fn count(&self, tenant_id: &str, status: Option<&str>) -> Result<i64>;
}

/// Keyword search against the legacy knowledge backend.
#[async_trait]
pub trait LegacySearch: Send + Sync {
    /// One page of keyword matches. `page` is 1-based.
    async fn search(
        &self,
        keyword: &str,
        page: u32,
        page_size: u32,
    ) -> std::result::Result<LegacyPage, LegacySearchError>;
}

/// Chat-completion client used for classification, personas, query
/// expansion, and guided fallbacks.
#[async_trait]
pub trait GenerativeCompletion: Send + Sync {
    /// Whether a credential is configured. When false, every stage that
    /// would call the model takes its non-generative branch instead.
    fn is_available(&self) -> bool;

    /// Returns the assistant reply text, or `None` on any failure.
    /// Implementations absorb their own transport and parse errors.
    async fn chat(&self, user_text: &str, system_prompt: &str, max_tokens: u32) -> Option<String>;
}

/// Fire-and-forget audit logging.
///
/// Every method swallows its own failures; audit problems never block
/// or fail the answer pipeline.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Create a conversation, returning its id. `None` on failure or
    /// when auditing is disabled.
    async fn start_conversation(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        channel: &str,
    ) -> Option<String>;

    /// Append one message, returning its id.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Option<String>;

    /// Record the intent decision made for a user message.
    async fn log_decision(
        &self,
        message_id: &str,
        decision: &IntentDecision,
        used_knowledge: bool,
        fallback_reason: Option<&str>,
    );

    /// Record the retrieval hits backing an answer.
    async fn log_retrieval(&self, message_id: &str, docs: &[RetrievedDoc]);

    /// Record the final answer and timing for an assistant message.
    async fn log_response(
        &self,
        message_id: &str,
        final_answer: &str,
        elapsed_ms: u64,
        is_success: bool,
    );
}
