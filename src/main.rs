//! # FaultDesk CLI (`fdk`)
//!
//! The `fdk` binary wires the pipeline's collaborators from a TOML
//! config and exposes ingest, retrieval, and serving commands.
//!
//! ## Usage
//!
//! ```bash
//! fdk --config ./config/faultdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fdk init` | Create the SQLite knowledge database and schema |
//! | `fdk ingest one <id>` | Rebuild the vectors for one entry |
//! | `fdk ingest batch <ids...>` | Rebuild a list of entries |
//! | `fdk ingest all` | Rebuild every entry for a tenant |
//! | `fdk query "<text>"` | Ranked retrieval without answer synthesis |
//! | `fdk ask "<question>"` | Answer a question through the full pipeline |
//! | `fdk serve` | Start the HTTP service |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! fdk init --config ./config/faultdesk.toml
//!
//! # Rebuild all published entries, clearing the collection first
//! fdk ingest all --status published --clear
//!
//! # Inspect what retrieval would feed the pipeline
//! fdk query "press alarm E012" --top-k 5
//!
//! # One-shot answer from the command line
//! fdk ask "the press stops mid-cycle with alarm E012"
//!
//! # Start the HTTP service on [service].bind
//! fdk serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use faultdesk::answer::AnswerPipeline;
use faultdesk::audit::{HttpAuditSink, NoopAudit};
use faultdesk::chroma::ChromaVectorStore;
use faultdesk::config::{self, Config};
use faultdesk::embedding::create_embedder;
use faultdesk::generative::ChatCompletionClient;
use faultdesk::ingest;
use faultdesk::knowledge::SqliteKnowledgeStore;
use faultdesk::legacy::HttpLegacySearch;
use faultdesk::memory::MemoryVectorStore;
use faultdesk::models::ChatRequest;
use faultdesk::retrieval;
use faultdesk::server;
use faultdesk::traits::{
    AuditSink, GenerativeCompletion, KnowledgeStore, LegacySearch, VectorStore,
};

/// FaultDesk CLI: intent-routed retrieval and answer synthesis for
/// industrial equipment fault support.
#[derive(Parser)]
#[command(
    name = "fdk",
    about = "Intent-routed retrieval and answer synthesis for equipment fault support",
    version,
    long_about = "FaultDesk classifies support questions by intent, retrieves matching knowledge \
    entries through a degrading chain (semantic vectors, legacy keyword search, model-expanded \
    keywords, guided fallback), and synthesizes structured troubleshooting answers."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/faultdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the knowledge database schema.
    ///
    /// Creates the SQLite file and the entry and attachment tables.
    /// Idempotent: running it again is safe.
    Init,

    /// Rebuild vectors from knowledge entries.
    Ingest {
        #[command(subcommand)]
        action: IngestAction,
    },

    /// Ranked retrieval for a question, without answer synthesis.
    ///
    /// Prints the deduplicated, weighted results the pipeline would
    /// work from. Useful for tuning weights and inspecting recall.
    Query {
        /// The question text to embed and search with.
        query: String,

        /// Tenant to search. Defaults to `[service].default_tenant`.
        #[arg(long)]
        tenant: Option<String>,

        /// Number of results to return. Defaults to `[retrieval].top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question through the full pipeline.
    ///
    /// Runs intent classification, retrieval with fallbacks, and answer
    /// synthesis, then prints the structured response as JSON.
    Ask {
        /// The user question.
        question: String,

        /// Tenant to answer for. Defaults to `[service].default_tenant`.
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Start the HTTP service.
    ///
    /// Binds to `[service].bind` and serves `/chat`, `/query`, the
    /// ingest endpoints, and `/health`.
    Serve,
}

/// Vector rebuild subcommands.
#[derive(Subcommand)]
enum IngestAction {
    /// Rebuild the vectors for one entry by id.
    One {
        /// Knowledge entry id.
        id: i64,
    },

    /// Rebuild a list of entries. Failures are reported per entry and
    /// never abort the batch.
    Batch {
        /// Knowledge entry ids.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Rebuild every entry for a tenant.
    All {
        /// Tenant to rebuild. Defaults to `[service].default_tenant`.
        #[arg(long)]
        tenant: Option<String>,

        /// Only rebuild entries with this status (e.g. `published`).
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of entries to rebuild.
        #[arg(long)]
        limit: Option<usize>,

        /// Clear the whole collection before rebuilding.
        #[arg(long)]
        clear: bool,
    },
}

fn build_vectors(cfg: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match cfg.vector.backend.as_str() {
        "chroma" => Ok(Arc::new(ChromaVectorStore::new(&cfg.vector)?)),
        _ => Ok(Arc::new(MemoryVectorStore::new())),
    }
}

/// Wire every collaborator from config. Used by `ask` and `serve`;
/// the narrower commands build only what they need.
async fn build_pipeline(cfg: &Config) -> anyhow::Result<AnswerPipeline> {
    let embedder = create_embedder(&cfg.embedding)?;
    let vectors = build_vectors(cfg)?;
    let knowledge: Arc<dyn KnowledgeStore> =
        Arc::new(SqliteKnowledgeStore::connect(&cfg.knowledge.path).await?);
    let legacy: Arc<dyn LegacySearch> =
        Arc::new(HttpLegacySearch::new(&cfg.legacy, &cfg.service.default_tenant)?);
    let generative: Arc<dyn GenerativeCompletion> =
        Arc::new(ChatCompletionClient::new(&cfg.generative)?);
    let audit: Arc<dyn AuditSink> = if cfg.audit.enabled {
        Arc::new(HttpAuditSink::new(&cfg.audit, &cfg.generative.model)?)
    } else {
        Arc::new(NoopAudit)
    };

    Ok(AnswerPipeline::new(
        cfg.clone(),
        embedder,
        vectors,
        knowledge,
        legacy,
        generative,
        audit,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteKnowledgeStore::connect(&cfg.knowledge.path).await?;
            store.init_schema().await?;
            println!(
                "Knowledge database initialized at {}",
                cfg.knowledge.path.display()
            );
        }
        Commands::Ingest { action } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let vectors = build_vectors(&cfg)?;
            let knowledge = SqliteKnowledgeStore::connect(&cfg.knowledge.path).await?;
            match action {
                IngestAction::One { id } => {
                    let upserted = ingest::rebuild_one(
                        &knowledge,
                        embedder.as_ref(),
                        vectors.as_ref(),
                        &cfg.retrieval,
                        id,
                    )
                    .await?;
                    println!("Entry {id}: {upserted} chunks upserted.");
                }
                IngestAction::Batch { ids } => {
                    let report = ingest::rebuild_batch(
                        &knowledge,
                        embedder.as_ref(),
                        vectors.as_ref(),
                        &cfg.retrieval,
                        &ids,
                        ingest::BATCH_LOG_EVERY,
                    )
                    .await;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                IngestAction::All {
                    tenant,
                    status,
                    limit,
                    clear,
                } => {
                    let tenant = tenant.unwrap_or_else(|| cfg.service.default_tenant.clone());
                    let report = ingest::rebuild_all(
                        &knowledge,
                        embedder.as_ref(),
                        vectors.as_ref(),
                        &cfg.retrieval,
                        &tenant,
                        status.as_deref(),
                        limit,
                        clear,
                    )
                    .await?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
        Commands::Query {
            query,
            tenant,
            top_k,
        } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let vectors = build_vectors(&cfg)?;
            let tenant = tenant.unwrap_or_else(|| cfg.service.default_tenant.clone());
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let results = retrieval::retrieve(
                embedder.as_ref(),
                vectors.as_ref(),
                &cfg.retrieval,
                &tenant,
                &query,
                top_k,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Ask { question, tenant } => {
            let pipeline = build_pipeline(&cfg).await?;
            let req = ChatRequest {
                question,
                tenant_id: tenant,
                conversation_id: None,
                user_id: None,
                channel: "cli".to_string(),
            };
            let response = pipeline.answer(&req).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Serve => {
            let pipeline = build_pipeline(&cfg).await?;
            server::run_server(pipeline).await?;
        }
    }

    Ok(())
}
