//! Sender pattern profiles.
//!
//! Aggregates a user's feedback on past analyses of one sender into
//! per-trigger-pattern statistics and a short natural-language summary. The
//! summary is fed verbatim to the fallback detector as prompt context, e.g.
//! "this sender's `ok` usually means busy, not upset".

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::detection::triggers::SHORT_RESPONSE_PATTERN;
use crate::store::FeedbackRecord;

/// Bucket for feedback whose analysis had no trigger or no longer exists.
pub const UNKNOWN_PATTERN: &str = "unknown";

/// Below this many feedback rows the profile context is empty.
pub const MIN_MESSAGES_FOR_CONTEXT: usize = 3;

const CONFIDENCE_SATURATION: f64 = 10.0;
const ACTIVITY_SATURATION: f64 = 100.0;
const NEUTRAL_HELPFULNESS: f64 = 0.5;
const TOP_PATTERNS: usize = 3;
const MAX_CONFIDENCE_BOOST: f64 = 20.0;

/// How one sender uses one trigger pattern, as judged by the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderPattern {
    pub pattern: String,
    pub occurrences: u32,
    /// Interpretation chosen by the user → number of times chosen.
    pub user_interpretations: BTreeMap<String, u32>,
    pub helpfulness_rate: f64,
    /// `min(occurrences / 10, 1.0)`.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    BriefAndDirect,
    Balanced,
    WarmAndVerbose,
}

impl CommunicationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BriefAndDirect => "brief_and_direct",
            Self::Balanced => "balanced",
            Self::WarmAndVerbose => "warm_and_verbose",
        }
    }

    /// Classify by the share of messages that tripped `short_response`.
    pub fn from_short_response_rate(rate: f64) -> Self {
        if rate > 0.6 {
            Self::BriefAndDirect
        } else if rate < 0.2 {
            Self::WarmAndVerbose
        } else {
            Self::Balanced
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    pub sender_id: String,
    pub total_messages: u32,
    /// Occurrences descending, then pattern name.
    pub patterns: Vec<SenderPattern>,
    pub average_helpfulness: f64,
    pub communication_style: CommunicationStyle,
    pub activity_score: f64,
}

#[derive(Default)]
struct Bucket {
    occurrences: u32,
    interpretations: BTreeMap<String, u32>,
    helpful: u32,
    rated: u32,
}

fn helpfulness(helpful: u32, rated: u32) -> f64 {
    if rated == 0 {
        NEUTRAL_HELPFULNESS
    } else {
        f64::from(helpful) / f64::from(rated)
    }
}

/// Confidence for a pattern seen `occurrences` times.
pub fn pattern_confidence(occurrences: u32) -> f64 {
    (f64::from(occurrences) / CONFIDENCE_SATURATION).min(1.0)
}

/// Build a profile from feedback rows for one (user, sender) pair. The rows
/// are expected to be windowed by the caller.
pub fn build_sender_profile(sender_id: &str, rows: &[FeedbackRecord]) -> SenderProfile {
    let mut buckets: HashMap<String, Bucket> = HashMap::new();
    let mut helpful = 0u32;
    let mut rated = 0u32;

    for row in rows {
        let pattern = row
            .trigger_pattern
            .clone()
            .unwrap_or_else(|| UNKNOWN_PATTERN.to_string());
        let bucket = buckets.entry(pattern).or_default();
        bucket.occurrences += 1;

        if let Some(interpretation) = &row.chosen_interpretation {
            *bucket
                .interpretations
                .entry(interpretation.clone())
                .or_insert(0) += 1;
        }

        if let Some(was_helpful) = row.was_helpful {
            bucket.rated += 1;
            rated += 1;
            if was_helpful {
                bucket.helpful += 1;
                helpful += 1;
            }
        }
    }

    let total_messages = rows.len() as u32;
    let short_responses = buckets
        .get(SHORT_RESPONSE_PATTERN)
        .map(|b| b.occurrences)
        .unwrap_or(0);
    let short_rate = if total_messages == 0 {
        0.0
    } else {
        f64::from(short_responses) / f64::from(total_messages)
    };

    let mut patterns: Vec<SenderPattern> = buckets
        .into_iter()
        .map(|(pattern, b)| SenderPattern {
            pattern,
            occurrences: b.occurrences,
            helpfulness_rate: helpfulness(b.helpful, b.rated),
            confidence: pattern_confidence(b.occurrences),
            user_interpretations: b.interpretations,
        })
        .collect();
    patterns.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.pattern.cmp(&b.pattern))
    });

    SenderProfile {
        sender_id: sender_id.to_string(),
        total_messages,
        patterns,
        average_helpfulness: helpfulness(helpful, rated),
        communication_style: CommunicationStyle::from_short_response_rate(short_rate),
        activity_score: (f64::from(total_messages) / ACTIVITY_SATURATION).min(1.0),
    }
}

/// Prompt context summarizing the profile. Empty for fewer than three
/// messages.
pub fn sender_context(profile: &SenderProfile) -> String {
    if (profile.total_messages as usize) < MIN_MESSAGES_FOR_CONTEXT {
        return String::new();
    }

    let mut lines = vec![format!(
        "**Sender Communication Pattern ({} messages):**",
        profile.total_messages
    )];

    for pattern in profile.patterns.iter().take(TOP_PATTERNS) {
        lines.push(format!(
            "- {}: appears in {} messages ({}% confidence)",
            pattern.pattern,
            pattern.occurrences,
            (pattern.confidence * 100.0).round() as u32
        ));
        if let Some(interpretation) = most_likely_interpretation(pattern) {
            lines.push(format!("  → Usually means: \"{interpretation}\""));
        }
    }

    lines.push(format!(
        "**Overall Style:** {}",
        profile.communication_style.as_str()
    ));
    lines.push(format!(
        "**Analysis Helpfulness:** {}%",
        (profile.average_helpfulness * 100.0).round() as u32
    ));

    lines.join("\n")
}

/// The interpretation the user picked most often for this pattern. Ties go
/// to the alphabetically first.
pub fn most_likely_interpretation(pattern: &SenderPattern) -> Option<&str> {
    pattern
        .user_interpretations
        .iter()
        .max_by(|(a_name, a_count), (b_name, b_count)| {
            a_count.cmp(b_count).then_with(|| b_name.cmp(a_name))
        })
        .map(|(name, _)| name.as_str())
}

/// Percentage points (0–20) to add to `interpretation` given how often the
/// user chose it for this pattern.
pub fn confidence_boost(pattern: &SenderPattern, interpretation: &str) -> u32 {
    let Some(&count) = pattern.user_interpretations.get(interpretation) else {
        return 0;
    };
    let total: u32 = pattern.user_interpretations.values().sum();
    if total == 0 {
        return 0;
    }
    (f64::from(count) / f64::from(total) * MAX_CONFIDENCE_BOOST).round() as u32
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn row(
        pattern: Option<&str>,
        interpretation: Option<&str>,
        helpful: Option<bool>,
    ) -> FeedbackRecord {
        FeedbackRecord {
            id: "f".into(),
            analysis_id: "a".into(),
            message_id: "m".into(),
            sender_id: "bob".into(),
            user_id: "alice".into(),
            chosen_interpretation: interpretation.map(String::from),
            was_helpful: helpful,
            feedback_at: Utc::now(),
            trigger_pattern: pattern.map(String::from),
        }
    }

    #[test]
    fn confidence_saturates() {
        assert_eq!(pattern_confidence(10), 1.0);
        assert_eq!(pattern_confidence(5), 0.5);
        assert_eq!(pattern_confidence(0), 0.0);
        assert_eq!(pattern_confidence(250), 1.0);
    }

    #[test]
    fn fewer_than_three_rows_yield_empty_context() {
        let rows = vec![row(Some("ok"), Some("busy"), Some(true)); 2];
        let profile = build_sender_profile("bob", &rows);
        assert_eq!(profile.total_messages, 2);
        assert!(sender_context(&profile).is_empty());

        let empty = build_sender_profile("bob", &[]);
        assert!(sender_context(&empty).is_empty());
        assert_eq!(empty.average_helpfulness, 0.5);
        assert_eq!(empty.communication_style, CommunicationStyle::WarmAndVerbose);
    }

    #[test]
    fn buckets_by_pattern_with_unknown_fallback() {
        let rows = vec![
            row(Some("ok"), Some("busy"), Some(true)),
            row(Some("ok"), Some("busy"), None),
            row(Some("ok"), Some("annoyed"), Some(false)),
            row(None, None, None),
        ];
        let profile = build_sender_profile("bob", &rows);
        assert_eq!(profile.patterns.len(), 2);

        let ok = &profile.patterns[0];
        assert_eq!(ok.pattern, "ok");
        assert_eq!(ok.occurrences, 3);
        assert_eq!(ok.user_interpretations.get("busy"), Some(&2));
        assert_eq!(ok.helpfulness_rate, 0.5);
        assert!((ok.confidence - 0.3).abs() < 1e-9);

        let unknown = &profile.patterns[1];
        assert_eq!(unknown.pattern, UNKNOWN_PATTERN);
        assert_eq!(unknown.helpfulness_rate, NEUTRAL_HELPFULNESS);
        assert!(unknown.user_interpretations.is_empty());

        // helpfulness only over rated rows: 1 helpful of 2 rated
        assert_eq!(profile.average_helpfulness, 0.5);
    }

    #[test]
    fn communication_style_thresholds() {
        let brief: Vec<_> = (0..7)
            .map(|_| row(Some(SHORT_RESPONSE_PATTERN), None, None))
            .chain((0..3).map(|_| row(Some("fine"), None, None)))
            .collect();
        assert_eq!(
            build_sender_profile("bob", &brief).communication_style,
            CommunicationStyle::BriefAndDirect
        );

        let balanced: Vec<_> = (0..3)
            .map(|_| row(Some(SHORT_RESPONSE_PATTERN), None, None))
            .chain((0..7).map(|_| row(Some("fine"), None, None)))
            .collect();
        assert_eq!(
            build_sender_profile("bob", &balanced).communication_style,
            CommunicationStyle::Balanced
        );

        let warm = vec![row(Some("fine"), None, None); 10];
        assert_eq!(
            build_sender_profile("bob", &warm).communication_style,
            CommunicationStyle::WarmAndVerbose
        );
    }

    #[test]
    fn activity_score_saturates() {
        let rows = vec![row(Some("ok"), None, None); 150];
        let profile = build_sender_profile("bob", &rows);
        assert_eq!(profile.activity_score, 1.0);
        let rows = vec![row(Some("ok"), None, None); 25];
        assert_eq!(build_sender_profile("bob", &rows).activity_score, 0.25);
    }

    #[test]
    fn context_lists_top_three_patterns() {
        let mut rows = Vec::new();
        rows.extend(vec![row(Some("ok"), Some("busy"), Some(true)); 5]);
        rows.extend(vec![row(Some("fine"), Some("agreeing"), Some(true)); 3]);
        rows.extend(vec![row(Some("sure"), None, Some(false)); 2]);
        rows.extend(vec![row(Some("k"), None, None); 1]);

        let profile = build_sender_profile("bob", &rows);
        let context = sender_context(&profile);

        assert!(context.starts_with("**Sender Communication Pattern (11 messages):**"));
        assert!(context.contains("- ok: appears in 5 messages (50% confidence)"));
        assert!(context.contains("  → Usually means: \"busy\""));
        assert!(context.contains("- fine: appears in 3 messages (30% confidence)"));
        assert!(context.contains("- sure: appears in 2 messages"));
        assert!(!context.contains("- k:"));
        assert!(context.contains("**Overall Style:** warm_and_verbose"));
        assert!(context.contains("**Analysis Helpfulness:** 80%"));
    }

    #[test]
    fn most_likely_interpretation_breaks_ties_by_name() {
        let rows = vec![
            row(Some("ok"), Some("upset"), None),
            row(Some("ok"), Some("busy"), None),
        ];
        let profile = build_sender_profile("bob", &rows);
        assert_eq!(most_likely_interpretation(&profile.patterns[0]), Some("busy"));

        let none = build_sender_profile("bob", &[row(Some("ok"), None, None)]);
        assert_eq!(most_likely_interpretation(&none.patterns[0]), None);
    }

    #[test]
    fn confidence_boost_scales_with_share() {
        let rows = vec![
            row(Some("ok"), Some("busy"), None),
            row(Some("ok"), Some("busy"), None),
            row(Some("ok"), Some("busy"), None),
            row(Some("ok"), Some("upset"), None),
        ];
        let pattern = &build_sender_profile("bob", &rows).patterns[0];
        assert_eq!(confidence_boost(pattern, "busy"), 15);
        assert_eq!(confidence_boost(pattern, "upset"), 5);
        assert_eq!(confidence_boost(pattern, "neutral"), 0);
    }

    #[test]
    fn profile_serializes_camel_case() {
        let profile = build_sender_profile("bob", &[row(Some("ok"), Some("busy"), Some(true))]);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["senderId"], "bob");
        assert_eq!(json["totalMessages"], 1);
        assert_eq!(json["communicationStyle"], "warm_and_verbose");
        assert_eq!(json["patterns"][0]["userInterpretations"]["busy"], 1);
    }
}
