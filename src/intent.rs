//! Intent classification with a deterministic rule fallback.
//!
//! The generative path asks the chat model for strict JSON; anything it
//! cannot parse into the closed intent set, and any classification under
//! the configured confidence floor, falls through to keyword rules. The
//! rules never fail, so classification always completes.

use serde::Deserialize;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::chunker::truncate_chars;
use crate::config::IntentConfig;
use crate::extract::extract_alarm_code;
use crate::models::{Intent, IntentDecision};
use crate::traits::GenerativeCompletion;

pub const INTENT_SYSTEM_PROMPT: &str = r#"You are the intent classifier for an industrial-equipment support assistant.
Sort the user's message into exactly one of four intents and reply with JSON only, nothing else:

- chat: greetings, small talk, thanks, feelings
  examples: hello, thanks a lot, goodbye
- capability: asking what the assistant can do or help with
  examples: what can you do, what problems can you analyze
- solution: a concrete fault, alarm, abnormal behaviour, or request for a fix
  examples: the machine won't eject sand, E001 alarm, pressure is abnormal, why did it stop
- handoff: an explicit request for a human agent or engineer
  examples: transfer me to a human, I want to talk to customer service

Note: "what faults can you analyze" with no concrete fault described is capability, not solution.

Reply exactly in this shape:
{"intent":"chat|capability|solution|handoff","confidence":0~1,"reason":"one short sentence"}"#;

static HANDOFF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(transfer (me )?to a human|human (agent|operator)|talk to a (human|person)|speak (to|with) a (human|person)|real person|customer service|call support|contact (an? )?engineer|escalate)\b").unwrap()
});

static SOLUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(alarm|fault|error|abnormal|abnormality|breakdown|malfunction|shutdown|shut down|stopped|stops|stuck|jammed|jams|won[’']?t|can[’']?t|cannot|doesn[’']?t work|not working|failure|failed|fails|leak|leaks|leaking|pressure|temperature|overheat|overheating|eject|why|how (do i|to) fix)\b").unwrap()
});

// Ability questions come in a loose "can you" + verb + object shape;
// all three parts must be present before the combination counts.
static CAP_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(can you|could you|are you able to|do you|what can you)\b").unwrap()
});
static CAP_VERB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(analy[sz]e|diagnose|troubleshoot|solve|handle|help|fix|do)\b").unwrap()
});
static CAP_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\bwhat\b|\bwhich\b|\bproblems?\b|\bissues?\b|\bfaults?\b|\bkinds?\b|\btypes?\b|\?)").unwrap()
});

const CAPABILITY_PHRASES: &[&str] = &[
    "what can you do",
    "what do you do",
    "what can you help",
    "how can you help",
    "what are you able to do",
    "what are your features",
    "what are you capable of",
    "what can this system do",
];

/// Classify one utterance. Never errors: a failed or low-confidence
/// generative classification degrades to [`rule_classify`].
pub async fn classify_intent(
    generative: &dyn GenerativeCompletion,
    cfg: &IntentConfig,
    user_input: &str,
) -> IntentDecision {
    if generative.is_available() {
        if let Some(raw) = generative
            .chat(user_input.trim(), INTENT_SYSTEM_PROMPT, 256)
            .await
        {
            match parse_decision(&raw) {
                Some(decision) if decision.confidence >= cfg.confidence_floor => return decision,
                Some(decision) => {
                    debug!(
                        intent = decision.intent.as_str(),
                        confidence = decision.confidence,
                        "classifier confidence below floor, using rules"
                    );
                }
                None => warn!("unparseable classifier reply, using rules"),
            }
        }
    }
    rule_classify(user_input)
}

#[derive(Deserialize)]
struct RawDecision {
    intent: String,
    #[serde(default = "default_raw_confidence")]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

fn default_raw_confidence() -> f64 {
    0.5
}

/// Parse a generative classification reply.
///
/// Tolerates code fences and prose around the JSON object; an intent tag
/// outside the closed set is a parse failure, not a default.
pub fn parse_decision(raw: &str) -> Option<IntentDecision> {
    let json = extract_json_block(raw)?;
    let parsed: RawDecision = serde_json::from_str(json).ok()?;
    let intent = Intent::parse(parsed.intent.trim().to_lowercase().as_str())?;
    let confidence = parsed.confidence.clamp(0.0, 1.0);
    let reason = truncate_chars(parsed.reason.trim(), 60);
    Some(IntentDecision {
        intent,
        confidence,
        reason: if reason.is_empty() { "ok".to_string() } else { reason },
    })
}

/// Substring between the first `{` and the last `}`.
fn extract_json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start <= end).then(|| &raw[start..=end])
}

/// Deterministic keyword classifier, evaluated in fixed order:
/// handoff, then solution, then capability, then chat.
pub fn rule_classify(user_input: &str) -> IntentDecision {
    if HANDOFF_RE.is_match(user_input) {
        return IntentDecision {
            intent: Intent::Handoff,
            confidence: 0.90,
            reason: "handoff phrase (rules)".to_string(),
        };
    }
    if SOLUTION_RE.is_match(user_input) || extract_alarm_code(user_input).is_some() {
        return IntentDecision {
            intent: Intent::Solution,
            confidence: 0.60,
            reason: "fault keyword (rules)".to_string(),
        };
    }
    if is_capability_question(user_input) {
        return IntentDecision {
            intent: Intent::Capability,
            confidence: 0.70,
            reason: "capability phrase (rules)".to_string(),
        };
    }
    IntentDecision {
        intent: Intent::Chat,
        confidence: 0.55,
        reason: "no keyword matched (rules)".to_string(),
    }
}

fn is_capability_question(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();
    if CAPABILITY_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }
    CAP_PREFIX_RE.is_match(user_input)
        && CAP_VERB_RE.is_match(user_input)
        && CAP_SUFFIX_RE.is_match(user_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct ScriptedGenerative {
        available: bool,
        reply: Option<String>,
    }

    #[async_trait]
    impl GenerativeCompletion for ScriptedGenerative {
        fn is_available(&self) -> bool {
            self.available
        }

        async fn chat(&self, _user: &str, _system: &str, _max_tokens: u32) -> Option<String> {
            self.reply.clone()
        }
    }

    #[test]
    fn test_rule_handoff_beats_everything() {
        let d = rule_classify("transfer me to a human");
        assert_eq!(d.intent, Intent::Handoff);
        assert!((d.confidence - 0.90).abs() < 1e-9);

        let d = rule_classify("the alarm is on, please get me customer service");
        assert_eq!(d.intent, Intent::Handoff);
    }

    #[test]
    fn test_rule_solution_keywords() {
        assert_eq!(rule_classify("machine won't eject sand").intent, Intent::Solution);
        assert_eq!(rule_classify("the E001 alarm keeps coming back").intent, Intent::Solution);
        assert_eq!(rule_classify("pressure reads way too low").intent, Intent::Solution);
        assert_eq!(rule_classify("why did it stop overnight").intent, Intent::Solution);
    }

    #[test]
    fn test_rule_capability_phrases() {
        assert_eq!(rule_classify("what can you do").intent, Intent::Capability);
        assert_eq!(
            rule_classify("can you diagnose hydraulic problems?").intent,
            Intent::Capability
        );
    }

    #[test]
    fn test_rule_defaults_to_chat() {
        let d = rule_classify("good morning");
        assert_eq!(d.intent, Intent::Chat);
        assert!((d.confidence - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_parse_decision_plain_json() {
        let d = parse_decision(r#"{"intent":"solution","confidence":0.92,"reason":"describes a fault"}"#)
            .unwrap();
        assert_eq!(d.intent, Intent::Solution);
        assert!((d.confidence - 0.92).abs() < 1e-9);
        assert_eq!(d.reason, "describes a fault");
    }

    #[test]
    fn test_parse_decision_fenced_json() {
        let raw = "```json\n{\"intent\":\"handoff\",\"confidence\":0.8,\"reason\":\"asks for a person\"}\n```";
        let d = parse_decision(raw).unwrap();
        assert_eq!(d.intent, Intent::Handoff);
    }

    #[test]
    fn test_parse_decision_clamps_confidence() {
        let d = parse_decision(r#"{"intent":"chat","confidence":1.7,"reason":"x"}"#).unwrap();
        assert!((d.confidence - 1.0).abs() < 1e-9);
        let d = parse_decision(r#"{"intent":"chat","confidence":-0.3,"reason":"x"}"#).unwrap();
        assert!(d.confidence.abs() < 1e-9);
    }

    #[test]
    fn test_parse_decision_defaults() {
        let d = parse_decision(r#"{"intent":"capability"}"#).unwrap();
        assert!((d.confidence - 0.5).abs() < 1e-9);
        assert_eq!(d.reason, "ok");
    }

    #[test]
    fn test_parse_decision_rejects_unknown_tag_and_garbage() {
        assert!(parse_decision(r#"{"intent":"banter","confidence":0.9,"reason":"?"}"#).is_none());
        assert!(parse_decision("the intent is solution").is_none());
        assert!(parse_decision("").is_none());
    }

    #[tokio::test]
    async fn test_classify_uses_generative_decision() {
        let g = ScriptedGenerative {
            available: true,
            reply: Some(r#"{"intent":"solution","confidence":0.9,"reason":"fault"}"#.to_string()),
        };
        let d = classify_intent(&g, &IntentConfig::default(), "hello").await;
        assert_eq!(d.intent, Intent::Solution);
        assert!((d.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_classify_low_confidence_falls_to_rules() {
        let g = ScriptedGenerative {
            available: true,
            reply: Some(r#"{"intent":"chat","confidence":0.2,"reason":"unsure"}"#.to_string()),
        };
        let d = classify_intent(&g, &IntentConfig::default(), "the motor stopped").await;
        assert_eq!(d.intent, Intent::Solution);
        assert_eq!(d.reason, "fault keyword (rules)");
    }

    #[tokio::test]
    async fn test_classify_garbage_reply_falls_to_rules() {
        let g = ScriptedGenerative {
            available: true,
            reply: Some("no json here".to_string()),
        };
        let d = classify_intent(&g, &IntentConfig::default(), "what can you do").await;
        assert_eq!(d.intent, Intent::Capability);
    }

    #[tokio::test]
    async fn test_classify_unavailable_generative_uses_rules() {
        let g = ScriptedGenerative {
            available: false,
            reply: None,
        };
        let d = classify_intent(&g, &IntentConfig::default(), "transfer me to a human").await;
        assert_eq!(d.intent, Intent::Handoff);
    }
}
