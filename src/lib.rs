//! # FaultDesk
//!
//! Intent-routed retrieval and answer synthesis for industrial equipment
//! fault support.
//!
//! FaultDesk sits between a support chat frontend and a tenant's knowledge
//! base. Incoming questions are classified into a closed set of intents;
//! fault questions walk a degrading retrieval chain (semantic vectors,
//! legacy keyword search, model-expanded keywords, guided fallback) and
//! every matched entry is turned into a structured troubleshooting answer
//! with causes, checkable steps, and a safety tip. The pipeline never
//! returns an empty answer: full exhaustion yields a low-confidence
//! response that tells the client to escalate.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Knowledge │──▶│ Chunk+Embed │──▶│ Vector store │
//! │  (SQLite)  │   │  (ingest)   │   │ memory/HTTP  │
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │  (fdk)   │       │  (/chat) │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fdk init                          # create the knowledge database
//! fdk ingest all                    # chunk and embed every entry
//! fdk query "press alarm E012"      # inspect ranked retrieval
//! fdk ask "the press stops mid-cycle with alarm E012"
//! fdk serve                         # start the HTTP service
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | Collaborator interfaces behind the pipeline |
//! | [`chunker`] | Entry-to-chunk composition |
//! | [`embedding`] | Embedding providers (fake, OpenAI-compatible) |
//! | [`ingest`] | Vector rebuild orchestration |
//! | [`retrieval`] | Weighted, deduplicated ranking |
//! | [`intent`] | Generative + rule intent classification |
//! | [`extract`] | Answer synthesis from knowledge entries |
//! | [`answer`] | The intent-routed pipeline |
//! | [`knowledge`] | SQLite-backed entry store |
//! | [`chroma`] | Chroma HTTP vector store |
//! | [`memory`] | In-memory stores |
//! | [`legacy`] | Legacy keyword-search client |
//! | [`generative`] | Chat-completion client |
//! | [`audit`] | Conversation audit sinks |
//! | [`server`] | HTTP service |

pub mod answer;
pub mod audit;
pub mod chroma;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generative;
pub mod ingest;
pub mod intent;
pub mod knowledge;
pub mod legacy;
pub mod memory;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod traits;
