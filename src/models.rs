//! Core data models used throughout faultdesk.
//!
//! These types represent the knowledge entries, embeddable chunks, retrieval
//! hits, and structured answers that flow through the intent-routing and
//! retrieval pipeline.

use serde::{Deserialize, Serialize};

/// A knowledge base entry authored by support engineers.
///
/// Entries are owned by the upstream knowledge service; this crate only
/// reads them (for chunking at ingest time and for answer synthesis at
/// query time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub tenant_id: String,
    pub title: String,
    pub question_text: String,
    pub cause_text: String,
    pub solution_text: String,
    pub tags: Vec<String>,
    pub status: String,
    pub version: i64,
    /// Names of reference materials linked to this entry. Only used to
    /// promote results whose material name overlaps the query text.
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Which field of an entry a chunk was derived from.
///
/// The kind determines the retrieval weight: question chunks rank above
/// cause chunks, which rank above the title fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Title + question text.
    Q,
    /// Title + cause text.
    C,
    /// Title restated with the question (extra retrieval surface).
    T,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Q => "q",
            ChunkKind::C => "c",
            ChunkKind::T => "t",
        }
    }

    pub fn parse(s: &str) -> Option<ChunkKind> {
        match s {
            "q" => Some(ChunkKind::Q),
            "c" => Some(ChunkKind::C),
            "t" => Some(ChunkKind::T),
            _ => None,
        }
    }
}

/// Metadata stored alongside each vector, copied from the source entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub tenant_id: String,
    pub entry_id: i64,
    pub kind: ChunkKind,
    pub status: String,
    pub version: i64,
    pub tags: Vec<String>,
}

/// An embeddable chunk derived from a knowledge entry.
///
/// The id is a deterministic function of `(tenant, entry, kind)`, so
/// re-ingesting an entry overwrites its previous vectors.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub kind: ChunkKind,
    pub metadata: ChunkMetadata,
}

/// A chunk plus its embedding, ready for the vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: ChunkMetadata,
}

/// A raw nearest-neighbour hit from the vector store.
///
/// `distance` follows the store's convention: smaller is more similar.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f64,
    pub metadata: ChunkMetadata,
}

/// A deduplicated, ranked retrieval result. At most one per entry.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub entry_id: i64,
    pub score: f64,
    pub hit_kind: ChunkKind,
}

/// Closed set of user intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Greetings, thanks, small talk.
    Chat,
    /// Asking what the assistant can do.
    Capability,
    /// Describing a fault or asking for a fix.
    Solution,
    /// Explicit request for a human agent.
    Handoff,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Capability => "capability",
            Intent::Solution => "solution",
            Intent::Handoff => "handoff",
        }
    }

    /// Strict tag parse. Anything outside the closed set is `None`,
    /// which callers treat as a classification parse failure.
    pub fn parse(s: &str) -> Option<Intent> {
        match s {
            "chat" => Some(Intent::Chat),
            "capability" => Some(Intent::Capability),
            "solution" => Some(Intent::Solution),
            "handoff" => Some(Intent::Handoff),
            _ => None,
        }
    }
}

/// Outcome of intent classification.
#[derive(Debug, Clone)]
pub struct IntentDecision {
    pub intent: Intent,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub reason: String,
}

/// How the client should render a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// Plain chat bubble, no troubleshooting structure.
    Conversation,
    /// Full structured troubleshooting card.
    Troubleshooting,
    /// Human-handoff script.
    Handoff,
}

/// One remediation step in a structured answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub action: String,
    pub expect: String,
    pub next: String,
}

/// Temporary workaround and final fix extracted from the solution text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub temporary: String,
    #[serde(rename = "final")]
    pub final_fix: String,
}

/// A knowledge entry cited as the basis of an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedDoc {
    pub entry_id: i64,
    pub title: String,
    pub excerpt: String,
}

/// A lower-ranked entry surfaced alongside the primary answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntry {
    pub entry_id: i64,
    pub title: String,
    pub excerpt: String,
}

/// The structured response returned for every request.
///
/// Constructed exactly once per request and never persisted here; the
/// audit sink receives a copy of the final answer text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub issue_category: String,
    pub alarm_code: Option<String>,
    pub confidence: f64,
    pub top_causes: Vec<String>,
    pub steps: Vec<Step>,
    pub solution: Solution,
    pub safety_tip: String,
    pub cited_docs: Vec<CitedDoc>,
    /// Uniformly derived: true exactly when `confidence` is below the
    /// configured escalation threshold (0.7 by default).
    pub should_escalate: bool,
    pub short_answer_text: String,
    pub related_entries: Vec<RelatedEntry>,
    pub reply_mode: ReplyMode,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
}

/// Incoming chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    "web".to_string()
}

/// A retrieval hit recorded against the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDoc {
    pub entry_id: i64,
    pub title: Option<String>,
    pub score: f64,
    pub rank: usize,
    pub hit_kind: Option<ChunkKind>,
}

/// One page of legacy keyword-search results.
#[derive(Debug, Clone)]
pub struct LegacyPage {
    pub items: Vec<KnowledgeEntry>,
    pub total_count: i64,
}

/// A per-entry failure recorded during a batch rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub entry_id: i64,
    pub error: String,
}

/// Summary returned by batch and full rebuilds.
///
/// A batch never aborts on an individual failure; every failed entry is
/// listed here instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildReport {
    pub total: usize,
    pub success: usize,
    pub failed: Vec<FailedEntry>,
    pub upserted_total: usize,
}

impl RebuildReport {
    pub fn empty() -> Self {
        Self {
            total: 0,
            success: 0,
            failed: Vec::new(),
            upserted_total: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_kind_roundtrip() {
        for kind in [ChunkKind::Q, ChunkKind::C, ChunkKind::T] {
            assert_eq!(ChunkKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChunkKind::parse("x"), None);
    }

    #[test]
    fn test_intent_parse_is_strict() {
        assert_eq!(Intent::parse("solution"), Some(Intent::Solution));
        assert_eq!(Intent::parse("handoff"), Some(Intent::Handoff));
        assert_eq!(Intent::parse("Solution"), None);
        assert_eq!(Intent::parse("other"), None);
        assert_eq!(Intent::parse(""), None);
    }

    #[test]
    fn test_intent_serde_tags() {
        let json = serde_json::to_string(&Intent::Capability).unwrap();
        assert_eq!(json, "\"capability\"");
        let parsed: Intent = serde_json::from_str("\"handoff\"").unwrap();
        assert_eq!(parsed, Intent::Handoff);
    }
}
