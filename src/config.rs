use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, loaded from a TOML file.
///
/// Credentials are never read from the file: the OpenAI-compatible
/// embedder reads `OPENAI_API_KEY`, the generative client reads
/// `FAULTDESK_GENERATIVE_API_KEY`, and internal calls to the legacy
/// backend and audit service read `FAULTDESK_INTERNAL_TOKEN`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generative: GenerativeConfig,
    #[serde(default)]
    pub legacy: LegacyConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_tenant: default_tenant(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}
fn default_tenant() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `"memory"` or `"chroma"`.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default = "default_chroma_url")]
    pub base_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            base_url: default_chroma_url(),
            collection: default_collection(),
            timeout_secs: default_client_timeout(),
        }
    }
}

fn default_vector_backend() -> String {
    "memory".to_string()
}
fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "kb_entries".to_string()
}
fn default_client_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"fake"` or `"openai"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: default_openai_url(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_embedding_provider() -> String {
    "fake".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerativeConfig {
    #[serde(default = "default_generative_url")]
    pub base_url: String,
    #[serde(default = "default_generative_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            base_url: default_generative_url(),
            model: default_generative_model(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_generative_url() -> String {
    "https://api.deepseek.com".to_string()
}
fn default_generative_model() -> String {
    "deepseek-chat".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LegacyConfig {
    #[serde(default = "default_legacy_url")]
    pub base_url: String,
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            base_url: default_legacy_url(),
            timeout_secs: default_client_timeout(),
        }
    }
}

fn default_legacy_url() -> String {
    "http://localhost:5000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_legacy_url")]
    pub base_url: String,
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_legacy_url(),
            timeout_secs: default_client_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum candidate count fetched before deduplication.
    #[serde(default = "default_over_fetch_floor")]
    pub over_fetch_floor: usize,
    #[serde(default = "default_weight_question")]
    pub weight_question: f64,
    #[serde(default = "default_weight_cause")]
    pub weight_cause: f64,
    #[serde(default = "default_weight_title")]
    pub weight_title: f64,
    /// Hard cap on chunk text length before embedding.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            over_fetch_floor: default_over_fetch_floor(),
            weight_question: default_weight_question(),
            weight_cause: default_weight_cause(),
            weight_title: default_weight_title(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_over_fetch_floor() -> usize {
    10
}
fn default_weight_question() -> f64 {
    1.20
}
fn default_weight_cause() -> f64 {
    1.00
}
fn default_weight_title() -> f64 {
    0.90
}
fn default_max_chunk_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentConfig {
    /// Generative classifications below this confidence fall through to
    /// the rule classifier.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
        }
    }
}

fn default_confidence_floor() -> f64 {
    0.55
}

/// Confidence tiers for synthesized troubleshooting answers.
#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    /// Single strong match.
    #[serde(default = "default_confidence_base")]
    pub confidence_base: f64,
    /// Match with additional related entries.
    #[serde(default = "default_confidence_related")]
    pub confidence_related: f64,
    /// Match without an alarm code or any extracted cause.
    #[serde(default = "default_confidence_sparse")]
    pub confidence_sparse: f64,
    /// Responses below this confidence carry `should_escalate = true`.
    #[serde(default = "default_escalate_below")]
    pub escalate_below: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            confidence_base: default_confidence_base(),
            confidence_related: default_confidence_related(),
            confidence_sparse: default_confidence_sparse(),
            escalate_below: default_escalate_below(),
        }
    }
}

fn default_confidence_base() -> f64 {
    0.8
}
fn default_confidence_related() -> f64 {
    0.7
}
fn default_confidence_sparse() -> f64 {
    0.6
}
fn default_escalate_below() -> f64 {
    0.7
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_chunk_chars == 0 {
        anyhow::bail!("retrieval.max_chunk_chars must be > 0");
    }
    for (name, w) in [
        ("weight_question", config.retrieval.weight_question),
        ("weight_cause", config.retrieval.weight_cause),
        ("weight_title", config.retrieval.weight_title),
    ] {
        if w <= 0.0 {
            anyhow::bail!("retrieval.{} must be > 0", name);
        }
    }

    // Validate intent
    if !(0.0..=1.0).contains(&config.intent.confidence_floor) {
        anyhow::bail!("intent.confidence_floor must be in [0.0, 1.0]");
    }

    // Validate synthesis tiers
    for (name, v) in [
        ("confidence_base", config.synthesis.confidence_base),
        ("confidence_related", config.synthesis.confidence_related),
        ("confidence_sparse", config.synthesis.confidence_sparse),
        ("escalate_below", config.synthesis.escalate_below),
    ] {
        if !(0.0..=1.0).contains(&v) {
            anyhow::bail!("synthesis.{} must be in [0.0, 1.0]", name);
        }
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "fake" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
        }
        other => anyhow::bail!("Unknown embedding provider: '{}'. Must be fake or openai.", other),
    }

    // Validate vector backend
    match config.vector.backend.as_str() {
        "memory" | "chroma" => {}
        other => anyhow::bail!("Unknown vector backend: '{}'. Must be memory or chroma.", other),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("faultdesk.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[knowledge]
path = "./data/kb.sqlite"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.embedding.provider, "fake");
        assert_eq!(cfg.vector.backend, "memory");
        assert_eq!(cfg.retrieval.top_k, 10);
        assert!((cfg.retrieval.weight_question - 1.20).abs() < 1e-9);
        assert!((cfg.intent.confidence_floor - 0.55).abs() < 1e-9);
        assert_eq!(cfg.retrieval.max_chunk_chars, 2000);
        assert_eq!(cfg.service.default_tenant, "default");
        assert!((cfg.synthesis.confidence_base - 0.8).abs() < 1e-9);
        assert!((cfg.synthesis.escalate_below - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_openai_provider_requires_model_and_dims() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[knowledge]
path = "./data/kb.sqlite"

[embedding]
provider = "openai"
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_vector_backend_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[knowledge]
path = "./data/kb.sqlite"

[vector]
backend = "pinecone"
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown vector backend"));
    }

    #[test]
    fn test_confidence_floor_bounds_checked() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[knowledge]
path = "./data/kb.sqlite"

[intent]
confidence_floor = 1.5
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
