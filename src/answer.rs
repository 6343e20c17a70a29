//! Answer pipeline: intent-routed retrieval and synthesis.
//!
//! One entry point, [`AnswerPipeline::answer`], drives the whole flow:
//! audit bookkeeping, intent classification, then per-intent routing.
//! Solution questions walk a degrading chain (semantic retrieval,
//! legacy keyword search, model-expanded keywords, guided fallback,
//! static fallback) so the user always receives a structured answer.
//! Only an unreachable legacy backend with no generative model left to
//! cover for it surfaces as an error.

use anyhow::Result;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::extract;
use crate::intent::classify_intent;
use crate::models::{
    AnswerResponse, ChatRequest, Intent, KnowledgeEntry, RankedResult, RetrievedDoc,
};
use crate::retrieval;
use crate::traits::{
    AuditSink, Embedder, GenerativeCompletion, KnowledgeStore, LegacySearch, VectorStore,
};

const LEGACY_PAGE_SIZE: u32 = 10;
const CHAT_MAX_TOKENS: u32 = 256;
const EXPANSION_MAX_TOKENS: u32 = 128;

const CHAT_SYSTEM: &str = "You are a friendly assistant on an industrial equipment support desk. \
Reply in one or two short sentences. If the user seems to have an equipment problem, \
invite them to describe the machine model, the alarm code if any, and the symptoms.";

const CHAT_GREETING: &str = "Hello! I'm the equipment support assistant. Describe your machine \
problem, ideally with the model and any alarm code, and I'll look it up in the knowledge base.";

// Kept under the 400-char conversational cap so it is never truncated.
const CAPABILITY_OVERVIEW: &str = "I can help with industrial equipment faults:\n\n\
- Fault diagnosis: describe the symptom, for example \"the press stops mid-cycle with alarm E012\".\n\
- Alarm code lookup: give me a code like E205 and I'll explain causes and fixes.\n\
- Step-by-step guidance: knowledge-base solutions turned into checkable steps.\n\n\
If I can't resolve it, ask for a human agent and I'll hand the conversation over.";

const AI_FALLBACK_SYSTEM: &str = "You are a troubleshooting assistant for industrial equipment. \
The user's problem could not be matched in the knowledge base. Do not invent a repair procedure. \
Ask up to three short clarifying questions that would pin the fault down: machine model and \
controller version, alarm code if any, what the machine is or is not doing, and recent \
operations or changes. Keep the whole reply under 200 words.";

const QUERY_EXPAND_SYSTEM: &str = "Extract one to three short search keywords from the user's \
equipment problem description. Reply with the keywords only, separated by commas. \
No numbering, no quotes, no explanations.";

static KEYWORD_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,，、;；\n]+").unwrap());
static KEYWORD_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[\.．、]?\s*").unwrap());

pub struct AnswerPipeline {
    config: Config,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    legacy: Arc<dyn LegacySearch>,
    generative: Arc<dyn GenerativeCompletion>,
    audit: Arc<dyn AuditSink>,
}

struct RouteOutcome {
    response: AnswerResponse,
    docs: Vec<RetrievedDoc>,
    fallback_reason: Option<&'static str>,
}

impl RouteOutcome {
    fn plain(response: AnswerResponse) -> Self {
        Self {
            response,
            docs: Vec::new(),
            fallback_reason: None,
        }
    }
}

impl AnswerPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        knowledge: Arc<dyn KnowledgeStore>,
        legacy: Arc<dyn LegacySearch>,
        generative: Arc<dyn GenerativeCompletion>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            embedder,
            vectors,
            knowledge,
            legacy,
            generative,
            audit,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn vectors(&self) -> &dyn VectorStore {
        self.vectors.as_ref()
    }

    pub fn knowledge(&self) -> &dyn KnowledgeStore {
        self.knowledge.as_ref()
    }

    /// Answer one chat turn. The response always carries a structured
    /// answer; the audit trail is recorded best-effort along the way.
    pub async fn answer(&self, req: &ChatRequest) -> Result<AnswerResponse> {
        let started = Instant::now();
        let question = req.question.trim();
        let tenant_id = req
            .tenant_id
            .clone()
            .unwrap_or_else(|| self.config.service.default_tenant.clone());

        let conversation_id = match &req.conversation_id {
            Some(id) => Some(id.clone()),
            None => {
                self.audit
                    .start_conversation(&tenant_id, req.user_id.as_deref(), &req.channel)
                    .await
            }
        };
        let user_message_id = match &conversation_id {
            Some(cid) => self.audit.append_message(cid, "user", question).await,
            None => None,
        };

        let decision = classify_intent(self.generative.as_ref(), &self.config.intent, question).await;
        info!(
            intent = decision.intent.as_str(),
            confidence = decision.confidence,
            reason = %decision.reason,
            "intent classified"
        );

        let RouteOutcome {
            mut response,
            docs,
            fallback_reason,
        } = match decision.intent {
            Intent::Handoff => {
                RouteOutcome::plain(extract::handoff_response(&self.config.synthesis))
            }
            Intent::Capability => RouteOutcome::plain(extract::conversation_response(
                CAPABILITY_OVERVIEW,
                &self.config.synthesis,
            )),
            Intent::Chat => self.chat_flow(question).await,
            Intent::Solution => self.solution_flow(&tenant_id, question).await?,
        };

        let assistant_message_id = match &conversation_id {
            Some(cid) => {
                self.audit
                    .append_message(cid, "assistant", &response.short_answer_text)
                    .await
            }
            None => None,
        };

        if let Some(mid) = &user_message_id {
            let used_knowledge = decision.intent == Intent::Solution;
            self.audit
                .log_decision(mid, &decision, used_knowledge, fallback_reason)
                .await;
            if !docs.is_empty() {
                self.audit.log_retrieval(mid, &docs).await;
            }
        }
        if let Some(mid) = &assistant_message_id {
            let elapsed = started.elapsed().as_millis() as u64;
            self.audit
                .log_response(mid, &response.short_answer_text, elapsed, true)
                .await;
        }

        response.conversation_id = conversation_id;
        response.message_id = assistant_message_id;
        Ok(response)
    }

    async fn chat_flow(&self, question: &str) -> RouteOutcome {
        let reply = self
            .generative
            .chat(question, CHAT_SYSTEM, CHAT_MAX_TOKENS)
            .await
            .unwrap_or_else(|| CHAT_GREETING.to_string());
        RouteOutcome::plain(extract::conversation_response(&reply, &self.config.synthesis))
    }

    /// The degrading retrieval chain for fault questions.
    async fn solution_flow(&self, tenant_id: &str, question: &str) -> Result<RouteOutcome> {
        // Semantic retrieval first. A broken vector store degrades to
        // keyword search instead of failing the request.
        let ranked = match retrieval::retrieve(
            self.embedder.as_ref(),
            self.vectors.as_ref(),
            &self.config.retrieval,
            tenant_id,
            question,
            self.config.retrieval.top_k,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("vector retrieval failed, falling back to keyword search: {e:#}");
                Vec::new()
            }
        };

        if !ranked.is_empty() {
            let (mut entries, docs) = self.load_ranked_entries(&ranked).await;
            if !entries.is_empty() {
                promote_by_attachment(&mut entries, question);
                let response = extract::synthesize_entry_answer(
                    &entries[0],
                    &entries[1..],
                    &self.config.synthesis,
                );
                return Ok(RouteOutcome {
                    response,
                    docs,
                    fallback_reason: None,
                });
            }
        }

        // Legacy keyword search. Unreachable backend: let the generative
        // model cover if it can, otherwise surface the failure.
        let page = match self.legacy.search(question, 1, LEGACY_PAGE_SIZE).await {
            Ok(page) => page,
            Err(e) => {
                if self.generative.is_available() {
                    warn!("legacy search failed, using guided fallback: {e}");
                    return Ok(RouteOutcome {
                        response: self.guided_fallback(question).await,
                        docs: Vec::new(),
                        fallback_reason: Some("no_match"),
                    });
                }
                return Err(anyhow::Error::new(e).context("legacy keyword search failed"));
            }
        };

        let mut entries = page.items;
        if entries.is_empty() {
            entries = self.expanded_keyword_search(question).await;
        }

        if entries.is_empty() {
            let response = if self.generative.is_available() {
                self.guided_fallback(question).await
            } else {
                extract::no_match_response(&self.config.synthesis)
            };
            return Ok(RouteOutcome {
                response,
                docs: Vec::new(),
                fallback_reason: Some("no_match"),
            });
        }

        promote_by_attachment(&mut entries, question);
        let response =
            extract::synthesize_entry_answer(&entries[0], &entries[1..], &self.config.synthesis);
        let docs = entries
            .iter()
            .enumerate()
            .map(|(i, e)| RetrievedDoc {
                entry_id: e.id,
                title: Some(e.title.clone()),
                score: response.confidence,
                rank: i + 1,
                hit_kind: None,
            })
            .collect();

        Ok(RouteOutcome {
            response,
            docs,
            fallback_reason: None,
        })
    }

    /// Load ranked entries in order, skipping ones that vanished from
    /// the knowledge store since they were indexed.
    async fn load_ranked_entries(
        &self,
        ranked: &[RankedResult],
    ) -> (Vec<KnowledgeEntry>, Vec<RetrievedDoc>) {
        let mut entries = Vec::with_capacity(ranked.len());
        let mut docs = Vec::with_capacity(ranked.len());
        for result in ranked {
            match self.knowledge.get_by_id(result.entry_id).await {
                Ok(Some(entry)) => {
                    docs.push(RetrievedDoc {
                        entry_id: result.entry_id,
                        title: Some(entry.title.clone()),
                        score: result.score,
                        rank: docs.len() + 1,
                        hit_kind: Some(result.hit_kind),
                    });
                    entries.push(entry);
                }
                Ok(None) => {
                    debug!(entry_id = result.entry_id, "ranked entry no longer in the knowledge store")
                }
                Err(e) => warn!(entry_id = result.entry_id, "knowledge load failed: {e:#}"),
            }
        }
        (entries, docs)
    }

    async fn guided_fallback(&self, question: &str) -> AnswerResponse {
        let reply = self
            .generative
            .chat(question, AI_FALLBACK_SYSTEM, self.config.generative.max_tokens)
            .await;
        extract::guided_response(reply.as_deref(), &self.config.synthesis)
    }

    /// Ask the model for alternative keywords and retry the legacy
    /// search with each. First keyword that matches wins.
    async fn expanded_keyword_search(&self, question: &str) -> Vec<KnowledgeEntry> {
        if !self.generative.is_available() {
            return Vec::new();
        }

        let prompt_input = format!("User question: {question}");
        let Some(reply) = self
            .generative
            .chat(&prompt_input, QUERY_EXPAND_SYSTEM, EXPANSION_MAX_TOKENS)
            .await
        else {
            return Vec::new();
        };

        for keyword in parse_expansion_keywords(&reply) {
            if keyword == question.trim() {
                continue;
            }
            match self.legacy.search(&keyword, 1, LEGACY_PAGE_SIZE).await {
                Ok(page) if !page.items.is_empty() => {
                    info!(%keyword, hits = page.items.len(), "expanded keyword matched");
                    return page.items;
                }
                Ok(_) => {}
                Err(e) => debug!(%keyword, "expanded keyword search failed: {e}"),
            }
        }
        Vec::new()
    }
}

/// Parse up to three keywords out of a model reply, tolerating the
/// numbering and quoting models add despite instructions.
fn parse_expansion_keywords(raw: &str) -> Vec<String> {
    KEYWORD_SPLIT_RE
        .split(raw)
        .map(|part| {
            let stripped = KEYWORD_PREFIX_RE.replace(part.trim(), "");
            stripped
                .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
                .to_string()
        })
        .filter(|k| (2..=50).contains(&k.chars().count()))
        .take(3)
        .collect()
}

/// Move the first entry whose attachment name overlaps the query text
/// to the front. Order is otherwise unchanged.
fn promote_by_attachment(entries: &mut Vec<KnowledgeEntry>, query: &str) {
    let query_lower = query.to_lowercase();
    let position = entries.iter().position(|entry| {
        entry.attachments.iter().any(|name| {
            let name_lower = name.to_lowercase();
            !name_lower.is_empty()
                && (query_lower.contains(&name_lower) || name_lower.contains(&query_lower))
        })
    });

    if let Some(pos) = position {
        if pos > 0 {
            let entry = entries.remove(pos);
            entries.insert(0, entry);
        }
    }
}
