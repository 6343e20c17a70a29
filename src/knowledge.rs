//! SQLite-backed knowledge store.
//!
//! Entries are authored in an upstream system and mirrored into a local
//! SQLite file; this store reads them for retrieval and serves the
//! batch rebuild. `upsert_entry` exists for seeding and mirror sync.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::models::KnowledgeEntry;
use crate::traits::KnowledgeStore;

pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_entries (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                question_text TEXT NOT NULL DEFAULT '',
                cause_text TEXT NOT NULL DEFAULT '',
                solution_text TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'published',
                version INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_attachments (
                entry_id INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                FOREIGN KEY (entry_id) REFERENCES kb_entries(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_entries_tenant ON kb_entries(tenant_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_entries_tenant_status ON kb_entries(tenant_id, status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_attachments_entry ON kb_attachments(entry_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or overwrite an entry and its attachment names.
    pub async fn upsert_entry(&self, entry: &KnowledgeEntry) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO kb_entries (id, tenant_id, title, question_text, cause_text, solution_text, tags, status, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                title = excluded.title,
                question_text = excluded.question_text,
                cause_text = excluded.cause_text,
                solution_text = excluded.solution_text,
                tags = excluded.tags,
                status = excluded.status,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.title)
        .bind(&entry.question_text)
        .bind(&entry.cause_text)
        .bind(&entry.solution_text)
        .bind(entry.tags.join(","))
        .bind(&entry.status)
        .bind(entry.version)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM kb_attachments WHERE entry_id = ?")
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;
        for name in &entry.attachments {
            sqlx::query("INSERT INTO kb_attachments (entry_id, file_name) VALUES (?, ?)")
                .bind(entry.id)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn get_by_id(&self, entry_id: i64) -> Result<Option<KnowledgeEntry>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, title, question_text, cause_text, solution_text, tags, status, version FROM kb_entries WHERE id = ?",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let attachments: Vec<String> = sqlx::query_scalar(
            "SELECT file_name FROM kb_attachments WHERE entry_id = ? ORDER BY file_name",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        let tags_raw: String = row.get("tags");
        Ok(Some(KnowledgeEntry {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            title: row.get("title"),
            question_text: row.get("question_text"),
            cause_text: row.get("cause_text"),
            solution_text: row.get("solution_text"),
            tags: split_tags(&tags_raw),
            status: row.get("status"),
            version: row.get("version"),
            attachments,
        }))
    }

    async fn list_ids(
        &self,
        tenant_id: &str,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<i64>> {
        // LIMIT -1 means unbounded in SQLite
        let limit_val: i64 = limit.map(|l| l as i64).unwrap_or(-1);
        let ids = sqlx::query_scalar(
            "SELECT id FROM kb_entries WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY id ASC LIMIT ?3",
        )
        .bind(tenant_id)
        .bind(status)
        .bind(limit_val)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn count(&self, tenant_id: &str, status: Option<&str>) -> Result<i64> {
        let n = sqlx::query_scalar(
            "SELECT COUNT(*) FROM kb_entries WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2)",
        )
        .bind(tenant_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, tenant: &str, status: &str) -> KnowledgeEntry {
        KnowledgeEntry {
            id,
            tenant_id: tenant.to_string(),
            title: format!("Fault {id}"),
            question_text: "Machine stops with alarm E012".to_string(),
            cause_text: "Low hydraulic pressure".to_string(),
            solution_text: "1. Check the pump\n2. Replace the filter".to_string(),
            tags: vec!["press".to_string(), "hydraulic".to_string()],
            status: status.to_string(),
            version: 1,
            attachments: vec!["pump-manual.pdf".to_string()],
        }
    }

    async fn store() -> (tempfile::TempDir, SqliteKnowledgeStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKnowledgeStore::connect(&dir.path().join("kb.db"))
            .await
            .unwrap();
        store.init_schema().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upsert_and_get_roundtrip() {
        let (_dir, store) = store().await;
        store.upsert_entry(&entry(42, "acme", "published")).await.unwrap();

        let loaded = store.get_by_id(42).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Fault 42");
        assert_eq!(loaded.tags, vec!["press", "hydraulic"]);
        assert_eq!(loaded.attachments, vec!["pump-manual.pdf"]);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_dir, store) = store().await;
        assert!(store.get_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_replaces_attachments() {
        let (_dir, store) = store().await;
        store.upsert_entry(&entry(1, "acme", "published")).await.unwrap();

        let mut updated = entry(1, "acme", "published");
        updated.version = 2;
        updated.attachments = vec!["wiring-diagram.pdf".to_string()];
        store.upsert_entry(&updated).await.unwrap();

        let loaded = store.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.attachments, vec!["wiring-diagram.pdf"]);
    }

    #[tokio::test]
    async fn test_list_ids_filters_tenant_status_and_limit() {
        let (_dir, store) = store().await;
        store.upsert_entry(&entry(1, "acme", "published")).await.unwrap();
        store.upsert_entry(&entry(2, "acme", "draft")).await.unwrap();
        store.upsert_entry(&entry(3, "acme", "published")).await.unwrap();
        store.upsert_entry(&entry(4, "other", "published")).await.unwrap();

        let all = store.list_ids("acme", None, None).await.unwrap();
        assert_eq!(all, vec![1, 2, 3]);

        let published = store.list_ids("acme", Some("published"), None).await.unwrap();
        assert_eq!(published, vec![1, 3]);

        let capped = store.list_ids("acme", None, Some(2)).await.unwrap();
        assert_eq!(capped, vec![1, 2]);

        assert_eq!(store.count("acme", Some("published")).await.unwrap(), 2);
        assert_eq!(store.count("other", None).await.unwrap(), 1);
    }
}
