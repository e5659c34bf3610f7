//! RSD trigger matcher.
//!
//! Flags brief or ambiguous phrasing that a rejection-sensitive reader is
//! likely to misread as dismissal:
//! - a fixed table of dismissive phrases ("ok", "fine", "we need to talk", ...)
//! - a synthetic `short_response` trigger for very short messages with no
//!   warmth indicator
//!
//! Pure and synchronous. No I/O.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::detection::types::{Severity, Trigger};

/// Pattern name of the synthetic short-message trigger.
pub const SHORT_RESPONSE_PATTERN: &str = "short_response";

/// Messages with at most this many words are candidates for `short_response`.
const SHORT_RESPONSE_MAX_WORDS: usize = 3;

const WARMTH_EMOJI: &[&str] = &["😊", "❤", "😄", "💕", "👍"];

/// Explicit tone markers (`/j`, `/srs`, ...) that state the sender's intent.
pub const TONE_INDICATORS: &[&str] = &[
    "/j",
    "/joking",
    "/s",
    "/sarcasm",
    "/srs",
    "/serious",
    "/nm",
    "/notmad",
    "/lh",
    "/lighthearted",
    "/gen",
];

/// Whether an explicit tone indicator suppresses the `short_response` trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneIndicatorPolicy {
    /// A tone indicator counts as stated intent: no `short_response`.
    #[default]
    Suppress,
    /// Tone indicators have no effect on trigger matching.
    Ignore,
}

impl std::str::FromStr for ToneIndicatorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "suppress" => Ok(Self::Suppress),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!("expected 'suppress' or 'ignore', got '{other}'")),
        }
    }
}

struct PhraseRule {
    regex: Regex,
    trigger: Trigger,
}

/// Deterministic RSD trigger matcher.
pub struct TriggerMatcher {
    phrases: Vec<PhraseRule>,
    tone_policy: ToneIndicatorPolicy,
}

fn phrase(
    pattern: &str,
    severity: Severity,
    explanation: &str,
    reassurance: &str,
) -> PhraseRule {
    PhraseRule {
        regex: Regex::new(&format!(r"\b{}\b", regex::escape(pattern))).unwrap(),
        trigger: Trigger {
            pattern: pattern.to_string(),
            severity,
            explanation: explanation.to_string(),
            reassurance: reassurance.to_string(),
        },
    }
}

impl TriggerMatcher {
    /// Create a matcher with the default phrase table.
    pub fn new(tone_policy: ToneIndicatorPolicy) -> Self {
        let phrases = vec![
            phrase(
                "ok",
                Severity::High,
                "Single-word responses like \"ok\" can trigger RSD as they feel dismissive",
                "This is likely just a quick acknowledgment, not disappointment",
            ),
            phrase(
                "fine",
                Severity::High,
                "\"Fine\" often feels passive-aggressive or dismissive",
                "They might genuinely mean \"that works for me\" without hidden meaning",
            ),
            phrase(
                "we need to talk",
                Severity::High,
                "This phrase strongly triggers anxiety about impending criticism",
                "This doesn't always mean bad news - they may just want to discuss something",
            ),
            phrase(
                "k",
                Severity::High,
                "Even shorter than \"ok\", feels very dismissive",
                "Some people just text quickly - not necessarily upset",
            ),
            phrase(
                "whatever",
                Severity::Medium,
                "Can feel like giving up or being annoyed",
                "Could mean \"I'm flexible\" rather than \"I don't care\"",
            ),
            phrase(
                "sure",
                Severity::Medium,
                "Can sound sarcastic or unenthusiastic",
                "Often means genuine agreement, just casual phrasing",
            ),
            phrase(
                "no worries",
                Severity::Low,
                "Meant to be reassuring but can feel dismissive",
                "They're trying to make you feel better, not minimize your concern",
            ),
        ];

        Self {
            phrases,
            tone_policy,
        }
    }

    /// Scan a message and return its triggers in table order, followed by
    /// `short_response` when it applies.
    pub fn detect(&self, message: &str) -> Vec<Trigger> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let lower = trimmed.to_lowercase();
        let mut detected: Vec<Trigger> = self
            .phrases
            .iter()
            .filter(|rule| rule.regex.is_match(&lower))
            .map(|rule| rule.trigger.clone())
            .collect();

        let word_count = trimmed.split_whitespace().count();
        let suppressed_by_tone = self.tone_policy == ToneIndicatorPolicy::Suppress
            && !extract_tone_indicators(trimmed).is_empty();

        if word_count <= SHORT_RESPONSE_MAX_WORDS
            && !has_warmth_indicator(trimmed)
            && !suppressed_by_tone
        {
            detected.push(Trigger {
                pattern: SHORT_RESPONSE_PATTERN.to_string(),
                severity: Severity::Medium,
                explanation: "Very short responses without warmth indicators can feel cold"
                    .to_string(),
                reassurance:
                    "Brief doesn't always mean upset - they might be busy or texting quickly"
                        .to_string(),
            });
        }

        detected
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new(ToneIndicatorPolicy::default())
    }
}

fn has_warmth_indicator(message: &str) -> bool {
    message.contains('!') || WARMTH_EMOJI.iter().any(|e| message.contains(e))
}

/// Extract known tone indicators (`/j`, `/srs`, ...) in message order.
pub fn extract_tone_indicators(message: &str) -> Vec<String> {
    message
        .split_whitespace()
        .map(|token| {
            token
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ')'))
                .to_lowercase()
        })
        .filter(|token| TONE_INDICATORS.contains(&token.as_str()))
        .collect()
}

/// Render the RSD alert block appended to model prompts. Empty when there are
/// no triggers.
pub fn rsd_prompt_addition(triggers: &[Trigger]) -> String {
    if triggers.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = triggers
        .iter()
        .map(|t| format!("- \"{}\" ({} severity): {}", t.pattern, t.severity, t.explanation))
        .collect();

    format!(
        "**RSD ALERT:** This message contains potential RSD triggers:\n{}\n\n\
         When analyzing, consider:\n\
         1. Is the message genuinely negative or just brief/casual?\n\
         2. Are there hidden cues suggesting actual criticism?\n\
         3. What evidence supports a negative vs neutral interpretation?\n",
        lines.join("\n")
    )
}
