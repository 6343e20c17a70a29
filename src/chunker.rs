//! Knowledge-entry chunker (q/c/t).
//!
//! Splits one entry into up to three embeddable chunks, one per source
//! field: `q` from the question, `c` from the cause, and `t` as a
//! title-plus-question fallback surface. Each chunk id is a
//! deterministic function of `(tenant, entry, kind)` so re-ingesting an
//! entry overwrites its previous vectors instead of accumulating new
//! ones.

use crate::models::{Chunk, ChunkKind, ChunkMetadata, KnowledgeEntry};

/// Collapse all interior whitespace runs to single spaces and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hard cap on chunk length, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Deterministic vector id: `{tenant}:kb:{entry_id}:{kind}`.
pub fn vector_id(tenant_id: &str, entry_id: i64, kind: ChunkKind) -> String {
    format!("{}:kb:{}:{}", tenant_id, entry_id, kind.as_str())
}

/// Build the embeddable chunks for one entry.
///
/// Emission rules:
/// - `q` iff the question text is non-empty (title + question).
/// - `c` iff the cause text is non-empty (title + cause).
/// - `t` iff both title and question are non-empty (restated together,
///   giving short titles an extra retrieval surface).
///
/// Every document is truncated to `max_chars` before embedding.
pub fn build_chunks(entry: &KnowledgeEntry, max_chars: usize) -> Vec<Chunk> {
    let title = clean_text(&entry.title);
    let question = clean_text(&entry.question_text);
    let cause = clean_text(&entry.cause_text);

    let metadata_for = |kind: ChunkKind| ChunkMetadata {
        tenant_id: entry.tenant_id.clone(),
        entry_id: entry.id,
        kind,
        status: entry.status.clone(),
        version: entry.version,
        tags: entry.tags.clone(),
    };

    let mut chunks = Vec::new();

    if !question.is_empty() {
        let doc = truncate_chars(&format!("Title: {}\nQuestion: {}", title, question), max_chars);
        chunks.push(Chunk {
            id: vector_id(&entry.tenant_id, entry.id, ChunkKind::Q),
            text: doc,
            kind: ChunkKind::Q,
            metadata: metadata_for(ChunkKind::Q),
        });
    }

    if !cause.is_empty() {
        let doc = truncate_chars(&format!("Title: {}\nCause: {}", title, cause), max_chars);
        chunks.push(Chunk {
            id: vector_id(&entry.tenant_id, entry.id, ChunkKind::C),
            text: doc,
            kind: ChunkKind::C,
            metadata: metadata_for(ChunkKind::C),
        });
    }

    if !title.is_empty() && !question.is_empty() {
        let doc = truncate_chars(&format!("{}. {}", title, question), max_chars);
        chunks.push(Chunk {
            id: vector_id(&entry.tenant_id, entry.id, ChunkKind::T),
            text: doc,
            kind: ChunkKind::T,
            metadata: metadata_for(ChunkKind::T),
        });
    }

    chunks
}
