//! Audit sinks for the conversation trail.
//!
//! The collaborator service records conversations, messages, intent
//! decisions, retrieval hits, and final responses through its internal
//! API. Auditing is best-effort throughout: any failure is logged and
//! swallowed, never surfaced to the caller. [`NoopAudit`] serves
//! deployments with auditing off.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AuditConfig;
use crate::models::{IntentDecision, RetrievedDoc};
use crate::traits::AuditSink;

/// Environment variable holding the collaborator's shared token, sent
/// as `X-Internal-Token`.
pub const INTERNAL_TOKEN_ENV: &str = "FAULTDESK_INTERNAL_TOKEN";

const PROMPT_VERSION: &str = "v1";

/// Sink used when auditing is disabled. Reports disabled and does
/// nothing.
pub struct NoopAudit;

#[async_trait]
impl AuditSink for NoopAudit {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn start_conversation(
        &self,
        _tenant_id: &str,
        _user_id: Option<&str>,
        _channel: &str,
    ) -> Option<String> {
        None
    }

    async fn append_message(&self, _conversation_id: &str, _role: &str, _content: &str) -> Option<String> {
        None
    }

    async fn log_decision(
        &self,
        _message_id: &str,
        _decision: &IntentDecision,
        _used_knowledge: bool,
        _fallback_reason: Option<&str>,
    ) {
    }

    async fn log_retrieval(&self, _message_id: &str, _docs: &[RetrievedDoc]) {}

    async fn log_response(&self, _message_id: &str, _final_answer: &str, _elapsed_ms: u64, _is_success: bool) {
    }
}

/// HTTP sink posting to the collaborator's `/internal/ai-audit/*`
/// endpoints.
pub struct HttpAuditSink {
    enabled: bool,
    base_url: String,
    token: String,
    /// Generative model name recorded with each decision.
    model_name: String,
    client: reqwest::Client,
}

impl HttpAuditSink {
    pub fn new(config: &AuditConfig, model_name: &str) -> anyhow::Result<Self> {
        let token = std::env::var(INTERNAL_TOKEN_ENV).unwrap_or_default();
        if config.enabled && token.is_empty() {
            warn!("audit enabled but {INTERNAL_TOKEN_ENV} is not set, auditing will be skipped");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            enabled: config.enabled,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            model_name: model_name.to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, payload: &serde_json::Value) -> Option<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("X-Internal-Token", &self.token)
            .json(payload)
            .send()
            .await;

        let response = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!(path, "audit call failed: {e}");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(path, %status, "audit call rejected: {body}");
            return None;
        }

        match response.json().await {
            Ok(json) => Some(json),
            // Some endpoints return an empty body; that still counts.
            Err(_) => Some(serde_json::Value::Null),
        }
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    fn is_enabled(&self) -> bool {
        self.enabled && !self.token.is_empty()
    }

    async fn start_conversation(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        channel: &str,
    ) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }

        let payload = serde_json::json!({
            "tenantId": tenant_id,
            "userId": user_id,
            "channel": channel,
            "metaJson": serde_json::Value::Null,
        });
        let json = self.post("/internal/ai-audit/conversation/start", &payload).await?;
        let conversation_id = json.get("conversationId")?.as_str()?.to_string();
        debug!(%conversation_id, "audit conversation started");
        Some(conversation_id)
    }

    async fn append_message(&self, conversation_id: &str, role: &str, content: &str) -> Option<String> {
        if !self.is_enabled() || conversation_id.is_empty() {
            return None;
        }

        let payload = serde_json::json!({
            "conversationId": conversation_id,
            "role": role,
            "content": content,
            "isMasked": false,
            "maskedContent": serde_json::Value::Null,
        });
        let json = self.post("/internal/ai-audit/message", &payload).await?;
        json.get("messageId")?.as_str().map(str::to_string)
    }

    async fn log_decision(
        &self,
        message_id: &str,
        decision: &IntentDecision,
        used_knowledge: bool,
        fallback_reason: Option<&str>,
    ) {
        if !self.is_enabled() || message_id.is_empty() {
            return;
        }

        let payload = serde_json::json!({
            "messageId": message_id,
            "intentType": decision.intent.as_str(),
            "confidence": decision.confidence,
            "modelName": self.model_name,
            "promptVersion": PROMPT_VERSION,
            "useKnowledge": used_knowledge,
            "fallbackReason": fallback_reason,
            "tokensIn": serde_json::Value::Null,
            "tokensOut": serde_json::Value::Null,
        });
        self.post("/internal/ai-audit/decision", &payload).await;
    }

    async fn log_retrieval(&self, message_id: &str, docs: &[RetrievedDoc]) {
        if !self.is_enabled() || message_id.is_empty() || docs.is_empty() {
            return;
        }

        let payload = serde_json::json!({
            "messageId": message_id,
            "docs": docs.iter().map(doc_payload).collect::<Vec<_>>(),
        });
        self.post("/internal/ai-audit/retrieval", &payload).await;
    }

    async fn log_response(&self, message_id: &str, final_answer: &str, elapsed_ms: u64, is_success: bool) {
        if !self.is_enabled() || message_id.is_empty() {
            return;
        }

        let payload = serde_json::json!({
            "messageId": message_id,
            "finalAnswer": final_answer,
            "responseTimeMs": elapsed_ms,
            "isSuccess": is_success,
            "errorType": serde_json::Value::Null,
            "errorDetail": serde_json::Value::Null,
        });
        self.post("/internal/ai-audit/response", &payload).await;
    }
}

fn doc_payload(doc: &RetrievedDoc) -> serde_json::Value {
    serde_json::json!({
        "docId": doc.entry_id.to_string(),
        "docTitle": doc.title,
        "score": doc.score,
        "rank": doc.rank,
        "chunkId": doc.hit_kind.map(|k| k.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkKind;

    #[test]
    fn test_doc_payload_shape() {
        let doc = RetrievedDoc {
            entry_id: 42,
            title: Some("Press fault".to_string()),
            score: 1.08,
            rank: 1,
            hit_kind: Some(ChunkKind::Q),
        };
        let payload = doc_payload(&doc);
        assert_eq!(payload["docId"], "42");
        assert_eq!(payload["docTitle"], "Press fault");
        assert_eq!(payload["rank"], 1);
        assert_eq!(payload["chunkId"], "q");
    }

    #[test]
    fn test_doc_payload_legacy_hit_has_null_chunk() {
        let doc = RetrievedDoc {
            entry_id: 7,
            title: None,
            score: 0.5,
            rank: 2,
            hit_kind: None,
        };
        let payload = doc_payload(&doc);
        assert_eq!(payload["chunkId"], serde_json::Value::Null);
        assert_eq!(payload["docTitle"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_noop_audit_is_disabled() {
        let sink = NoopAudit;
        assert!(!sink.is_enabled());
        assert_eq!(sink.start_conversation("acme", None, "web").await, None);
        assert_eq!(sink.append_message("c1", "user", "hi").await, None);
    }

    #[tokio::test]
    async fn test_http_sink_without_token_is_disabled() {
        let config = AuditConfig {
            enabled: true,
            base_url: "http://localhost:1".to_string(),
            timeout_secs: 1,
        };
        let sink = HttpAuditSink {
            enabled: config.enabled,
            base_url: config.base_url.clone(),
            token: String::new(),
            model_name: "test-model".to_string(),
            client: reqwest::Client::new(),
        };
        assert!(!sink.is_enabled());
        // disabled sink never touches the network
        assert_eq!(sink.start_conversation("acme", None, "web").await, None);
    }
}
