//! Keyword search against the legacy knowledge-base service.
//!
//! The legacy backend exposes `GET /api/knowledgeitems/search` with
//! camelCase JSON and 1-based paging. Failures are classified into
//! [`LegacySearchError`] variants so the answer pipeline can map them to
//! distinct HTTP statuses.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::LegacyConfig;
use crate::models::{KnowledgeEntry, LegacyPage};
use crate::traits::{LegacySearch, LegacySearchError};

/// Environment variable holding the shared service token, forwarded as
/// `X-Internal-Token` when present.
pub const INTERNAL_TOKEN_ENV: &str = "FAULTDESK_INTERNAL_TOKEN";

pub struct HttpLegacySearch {
    base_url: String,
    tenant_id: String,
    internal_token: Option<String>,
    client: reqwest::Client,
}

impl HttpLegacySearch {
    /// The legacy backend is tenant-scoped per deployment; the tenant is
    /// fixed here and sent as `X-Tenant-Id` on every request.
    pub fn new(config: &LegacyConfig, tenant_id: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.to_string(),
            internal_token: std::env::var(INTERNAL_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            client,
        })
    }
}

#[async_trait]
impl LegacySearch for HttpLegacySearch {
    async fn search(
        &self,
        keyword: &str,
        page: u32,
        page_size: u32,
    ) -> Result<LegacyPage, LegacySearchError> {
        let url = format!("{}/api/knowledgeitems/search", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("keyword", keyword)])
            .query(&[("pageIndex", page), ("pageSize", page_size)])
            .header("X-Tenant-Id", &self.tenant_id);
        if let Some(token) = &self.internal_token {
            request = request.header("X-Internal-Token", token);
        }

        let response = request.send().await.map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LegacySearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: LegacySearchResponse = response
            .json()
            .await
            .map_err(|e| LegacySearchError::Other(format!("invalid search response: {e}")))?;
        debug!(keyword, total = page.total_count, "legacy search complete");

        Ok(LegacyPage {
            items: page
                .items
                .into_iter()
                .map(|item| item.into_entry(&self.tenant_id))
                .collect(),
            total_count: page.total_count,
        })
    }
}

fn classify_request_error(e: reqwest::Error) -> LegacySearchError {
    if e.is_timeout() {
        LegacySearchError::Timeout(e.to_string())
    } else if e.is_connect() {
        LegacySearchError::Connect(e.to_string())
    } else {
        LegacySearchError::Other(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySearchResponse {
    #[serde(default)]
    items: Vec<LegacyItem>,
    #[serde(default)]
    total_count: i64,
}

/// Wire shape of one legacy knowledge item. Tags arrive comma-joined.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyItem {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    question_text: String,
    #[serde(default)]
    cause_text: String,
    #[serde(default)]
    solution_text: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    version: Option<i64>,
}

impl LegacyItem {
    fn into_entry(self, tenant_id: &str) -> KnowledgeEntry {
        KnowledgeEntry {
            id: self.id,
            tenant_id: tenant_id.to_string(),
            title: self.title,
            question_text: self.question_text,
            cause_text: self.cause_text,
            solution_text: self.solution_text,
            tags: self
                .tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            status: self.status.unwrap_or_else(|| "published".to_string()),
            version: self.version.unwrap_or(1),
            attachments: vec![],
        }
    }
}
