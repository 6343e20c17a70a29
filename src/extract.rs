//! Pure text-to-structure answer synthesis.
//!
//! Every structured `AnswerResponse` the pipeline can emit is built here,
//! from free-form entry text or a generative reply, with no I/O. The
//! extraction rules encode how support engineers actually write entries:
//!
//! - alarm code: first `E` + three digits, case-insensitive, uppercased.
//! - issue category: alarm code, then feed / pressure / temperature
//!   keywords in that order, then the first tag, then "other".
//! - causes: split on newlines and sentence delimiters, strip leading
//!   numbering and bullets, drop fragments of three chars or less, keep
//!   at most five.
//! - steps: same split over the solution text (cause text when the
//!   solution is empty); a line holding an action verb becomes a titled
//!   step, anything else a generic numbered one; the last follow-up
//!   always points at technical support.
//! - solution: `Temporary:` / `Final:` (or `Root cause:` / `Permanent:`)
//!   prefixes when present, otherwise a prefix cut of the raw text.
//!
//! Confidence tiers and the escalation threshold come from
//! [`SynthesisConfig`]; `should_escalate` is always derived as
//! `confidence < escalate_below`, whatever branch produced the response.

use regex::Regex;
use std::sync::LazyLock;

use crate::chunker::truncate_chars;
use crate::config::SynthesisConfig;
use crate::models::{
    AnswerResponse, CitedDoc, KnowledgeEntry, RelatedEntry, ReplyMode, Solution, Step,
};

/// Disclaimer attached to every synthesized troubleshooting answer.
const SAFETY_TIP_FAULT: &str = "⚠️ Safety: disconnect power before servicing the machine. Electrical work must be done by qualified personnel.";
/// Softer variant for guidance responses that carry no concrete fix.
const SAFETY_TIP_GUIDANCE: &str =
    "⚠️ Safety: if the machine behaves abnormally, stop it first and make sure the area is safe.";

const HANDOFF_SCRIPT: &str = "I'm transferring you to a human support engineer. Please leave your machine model, the alarm code if any, and a short description of the problem; an engineer will pick this up shortly.";

/// Confidence of generative fallback and conversational responses.
const FALLBACK_CONFIDENCE: f64 = 0.5;
/// Confidence of the static response when every tier came up empty.
const NO_MATCH_CONFIDENCE: f64 = 0.3;

static ALARM_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)E\d{3}").unwrap());

// Entries mix English and the occasional untranslated line, so the split
// set keeps the CJK delimiters alongside newlines and semicolons. ASCII
// '.' stays out of it: alarm codes and decimals would split mid-token.
static SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\n\r；;。]").unwrap());

static LEADING_NUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[\.、]?\s*").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[•·]\s*").unwrap());

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(check|test|calibrate|clean|adjust|replace|repair|inspect|observe)").unwrap()
});

static FEED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(feed|infeed)").unwrap());
static PRESSURE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bpressure").unwrap());
static TEMPERATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(temperature|overheat)").unwrap());

static TEMP_SOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btemporary\s*[:：]\s*([^.。\n]+)").unwrap());
static FINAL_SOLUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:final|root cause|permanent)\s*[:：]\s*([^.。\n]+)").unwrap()
});

/// First alarm code in the text, uppercased, if any.
pub fn extract_alarm_code(text: &str) -> Option<String> {
    ALARM_CODE_RE.find(text).map(|m| m.as_str().to_uppercase())
}

/// Coarse issue category for the response header.
pub fn issue_category(title: &str, question_text: &str, tags: &[String]) -> String {
    let combined = format!("{} {}", title, question_text);
    if extract_alarm_code(&combined).is_some() {
        return "alarm code".to_string();
    }
    if FEED_RE.is_match(&combined) {
        return "feed".to_string();
    }
    if PRESSURE_RE.is_match(&combined) {
        return "pressure".to_string();
    }
    if TEMPERATURE_RE.is_match(&combined) {
        return "temperature".to_string();
    }
    if let Some(tag) = tags.iter().map(|t| t.trim()).find(|t| !t.is_empty()) {
        return tag.to_string();
    }
    "other".to_string()
}

fn strip_line_markers(line: &str) -> String {
    let no_num = LEADING_NUM_RE.replace(line, "");
    BULLET_RE.replace(&no_num, "").trim().to_string()
}

/// Candidate causes from the entry's cause text, at most five.
pub fn parse_causes(cause_text: &str) -> Vec<String> {
    if cause_text.trim().is_empty() {
        return Vec::new();
    }
    let mut causes = Vec::new();
    for raw in SPLIT_RE.split(cause_text) {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let cleaned = strip_line_markers(line);
        if cleaned.chars().count() > 3 {
            causes.push(cleaned);
            if causes.len() == 5 {
                break;
            }
        }
    }
    causes
}

/// Remediation steps from the solution text, falling back to the cause
/// text when no solution was authored.
pub fn parse_steps(solution_text: &str, cause_text: &str) -> Vec<Step> {
    let text = if solution_text.trim().is_empty() {
        cause_text
    } else {
        solution_text
    };
    if text.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let total = lines.len();

    let mut steps = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let i = idx + 1;
        let cleaned = strip_line_markers(line);
        if cleaned.chars().count() <= 5 {
            continue;
        }
        if ACTION_RE.is_match(&cleaned) {
            steps.push(Step {
                title: truncate_chars(&cleaned, 50),
                action: cleaned,
                expect: "Check or operation completed".to_string(),
                next: if i < total {
                    "If unresolved, proceed to the next step".to_string()
                } else {
                    "If unresolved, contact technical support".to_string()
                },
            });
        } else {
            steps.push(Step {
                title: format!("Step {}", i),
                action: cleaned,
                expect: "Operation completed".to_string(),
                next: if i < total {
                    "Proceed to the next step".to_string()
                } else {
                    "If unresolved, contact technical support".to_string()
                },
            });
        }
    }

    // Nothing survived the split, surface the raw text as one step.
    if steps.is_empty() {
        steps.push(Step {
            title: "Review the solution".to_string(),
            action: truncate_chars(text.trim(), 200),
            expect: "Issue resolved".to_string(),
            next: "If unresolved, contact technical support".to_string(),
        });
    }
    steps
}

/// Temporary workaround and final fix, from explicit prefixes when the
/// author wrote them, otherwise cut from the raw text.
pub fn parse_solution(solution_text: &str, cause_text: &str) -> Solution {
    let text = if solution_text.trim().is_empty() {
        cause_text
    } else {
        solution_text
    };
    let text = text.trim();
    if text.is_empty() {
        return Solution {
            temporary: "No temporary workaround recorded".to_string(),
            final_fix: "Work through the detailed steps or contact technical support".to_string(),
        };
    }
    let temporary = TEMP_SOLUTION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| truncate_chars(text, 100));
    let final_fix = FINAL_SOLUTION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| text.to_string());
    Solution { temporary, final_fix }
}

fn excerpt_of(entry: &KnowledgeEntry) -> String {
    if entry.question_text.trim().is_empty() {
        entry.title.clone()
    } else {
        entry.question_text.clone()
    }
}

/// Build the structured troubleshooting answer from the best-ranked entry.
///
/// `related` holds the remaining ranked entries in order; their presence
/// lowers confidence one tier, a primary without an alarm code or any
/// extractable cause lowers it another.
pub fn synthesize_entry_answer(
    primary: &KnowledgeEntry,
    related: &[KnowledgeEntry],
    cfg: &SynthesisConfig,
) -> AnswerResponse {
    let alarm_code = extract_alarm_code(&format!("{} {}", primary.title, primary.question_text));
    let issue_category = issue_category(&primary.title, &primary.question_text, &primary.tags);

    let mut top_causes = parse_causes(&primary.cause_text);
    if top_causes.is_empty() {
        if let Some(first) = primary
            .solution_text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
        {
            top_causes.push(truncate_chars(first, 100));
        }
    }

    let steps = parse_steps(&primary.solution_text, &primary.cause_text);
    let solution = parse_solution(&primary.solution_text, &primary.cause_text);

    let mut confidence = cfg.confidence_base;
    if !related.is_empty() {
        confidence = cfg.confidence_related;
    }
    if alarm_code.is_none() && top_causes.is_empty() {
        confidence = cfg.confidence_sparse;
    }

    let lead_cause = top_causes
        .first()
        .map(|c| c.trim_end_matches(['.', '。']).trim_end().to_string());
    let short_answer_text = match (&alarm_code, &lead_cause) {
        (Some(code), Some(cause)) => format!("Identified alarm code {}. {}.", code, cause),
        (Some(code), None) => format!(
            "Identified alarm code {}. Work through the troubleshooting steps below.",
            code
        ),
        (None, Some(cause)) => format!(
            "{}. {}. Work through the troubleshooting steps below.",
            primary.title, cause
        ),
        (None, None) => format!("{}. See the detailed steps and solution below.", primary.title),
    };

    let related_entries = related
        .iter()
        .map(|e| RelatedEntry {
            entry_id: e.id,
            title: e.title.clone(),
            excerpt: excerpt_of(e),
        })
        .collect();

    AnswerResponse {
        issue_category,
        alarm_code,
        confidence,
        top_causes,
        steps,
        solution,
        safety_tip: SAFETY_TIP_FAULT.to_string(),
        cited_docs: vec![CitedDoc {
            entry_id: primary.id,
            title: primary.title.clone(),
            excerpt: excerpt_of(primary),
        }],
        should_escalate: confidence < cfg.escalate_below,
        short_answer_text,
        related_entries,
        reply_mode: ReplyMode::Troubleshooting,
        conversation_id: None,
        message_id: None,
    }
}

/// Static response when every retrieval tier came up empty and no
/// generative completion is configured.
pub fn no_match_response(cfg: &SynthesisConfig) -> AnswerResponse {
    let confidence = NO_MATCH_CONFIDENCE;
    AnswerResponse {
        issue_category: "other".to_string(),
        alarm_code: None,
        confidence,
        top_causes: vec![
            "The problem description is too brief".to_string(),
            "No matching entry in the knowledge base".to_string(),
        ],
        steps: vec![Step {
            title: "Provide more detail".to_string(),
            action: "Please provide: 1) machine model and controller version; 2) alarm code, if any; 3) what the machine is doing; 4) recent operations".to_string(),
            expect: "Enough detail to diagnose".to_string(),
            next: "Re-run the diagnosis with the added detail".to_string(),
        }],
        solution: Solution {
            temporary: "No concrete fix can be offered without more information".to_string(),
            final_fix: "Add the missing details and ask again, or contact technical support"
                .to_string(),
        },
        safety_tip: SAFETY_TIP_GUIDANCE.to_string(),
        cited_docs: vec![],
        should_escalate: confidence < cfg.escalate_below,
        short_answer_text: "The description is too brief to match anything in the knowledge base. Please add the machine model, alarm code, symptoms, and recent operations, or ask for a human agent.".to_string(),
        related_entries: vec![],
        reply_mode: ReplyMode::Troubleshooting,
        conversation_id: None,
        message_id: None,
    }
}

/// Guided clarification built from a generative fallback reply.
///
/// Lines containing a question mark become up to three clarifying steps;
/// a reply without any becomes a single catch-all step. An empty or
/// missing reply degrades to [`no_match_response`].
pub fn guided_response(ai_text: Option<&str>, cfg: &SynthesisConfig) -> AnswerResponse {
    let text = match ai_text.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return no_match_response(cfg),
    };

    let mut short_answer = truncate_chars(text, 400);
    if text.chars().count() > 400 {
        short_answer.push_str("...");
    }

    let question_lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && (l.contains('?') || l.contains('？')))
        .collect();

    let mut steps = Vec::new();
    if question_lines.is_empty() {
        steps.push(Step {
            title: "Add the missing detail".to_string(),
            action: truncate_chars(text, 300),
            expect: "Enough detail to diagnose".to_string(),
            next: "A targeted fix follows once the details are in".to_string(),
        });
    } else {
        let total = question_lines.len();
        for (idx, line) in question_lines.iter().take(3).enumerate() {
            let i = idx + 1;
            steps.push(Step {
                title: format!("Clarifying question {}", i),
                action: (*line).to_string(),
                expect: "Information gathered for further diagnosis".to_string(),
                next: if i < total {
                    "Answer the remaining questions".to_string()
                } else {
                    "A targeted fix follows once the details are in".to_string()
                },
            });
        }
    }

    let confidence = FALLBACK_CONFIDENCE;
    AnswerResponse {
        issue_category: "other".to_string(),
        alarm_code: None,
        confidence,
        top_causes: vec![
            "A few more details are needed before a targeted answer is possible".to_string(),
        ],
        steps,
        solution: Solution {
            temporary: "Answer the clarifying questions above".to_string(),
            final_fix: "A targeted solution follows once the details are in".to_string(),
        },
        safety_tip: SAFETY_TIP_GUIDANCE.to_string(),
        cited_docs: vec![],
        should_escalate: confidence < cfg.escalate_below,
        short_answer_text: short_answer,
        related_entries: vec![],
        reply_mode: ReplyMode::Troubleshooting,
        conversation_id: None,
        message_id: None,
    }
}

/// Plain chat-bubble response carrying no troubleshooting structure.
pub fn conversation_response(text: &str, cfg: &SynthesisConfig) -> AnswerResponse {
    let trimmed = text.trim();
    let mut short_answer = truncate_chars(trimmed, 400);
    if trimmed.chars().count() > 400 {
        short_answer.push_str("...");
    }
    let confidence = FALLBACK_CONFIDENCE;
    AnswerResponse {
        issue_category: "other".to_string(),
        alarm_code: None,
        confidence,
        top_causes: vec![],
        steps: vec![],
        solution: Solution {
            temporary: String::new(),
            final_fix: String::new(),
        },
        safety_tip: String::new(),
        cited_docs: vec![],
        should_escalate: confidence < cfg.escalate_below,
        short_answer_text: short_answer,
        related_entries: vec![],
        reply_mode: ReplyMode::Conversation,
        conversation_id: None,
        message_id: None,
    }
}

/// Fixed script returned when the user asks for a human.
pub fn handoff_response(cfg: &SynthesisConfig) -> AnswerResponse {
    let confidence = FALLBACK_CONFIDENCE;
    AnswerResponse {
        issue_category: "other".to_string(),
        alarm_code: None,
        confidence,
        top_causes: vec![],
        steps: vec![],
        solution: Solution {
            temporary: String::new(),
            final_fix: String::new(),
        },
        safety_tip: String::new(),
        cited_docs: vec![],
        should_escalate: confidence < cfg.escalate_below,
        short_answer_text: HANDOFF_SCRIPT.to_string(),
        related_entries: vec![],
        reply_mode: ReplyMode::Handoff,
        conversation_id: None,
        message_id: None,
    }
}
