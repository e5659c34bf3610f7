//! Deterministic boundary rule engine.
//!
//! Runs before the model fallback and short-circuits it whenever anything
//! fires. Four independent sub-detectors, all of which may fire on the same
//! message:
//! - guilt-tripping phrases → `guilt_tripping`
//! - invasive questions / private topics → `overstepping`
//! - urgency or requests outside work hours → `after_hours_pressure`
//! - prior violations in the trailing window → `repeated_pushing`
//!
//! The engine never reads a clock: the caller passes the message time already
//! shifted to the sender's local offset.

use chrono::{DateTime, FixedOffset, Timelike};
use regex::Regex;
use tracing::debug;

use crate::detection::types::{BoundaryViolation, ResponseTemplates, Severity, ViolationType};

const GUILT_TRIP_PHRASES: &[&str] = &[
    "only you can",
    "really need you",
    "nobody else",
    "i depend on you",
    "you always help me",
    "don't abandon me",
    "you're the only one",
    "if you really cared",
    "how could you",
    "after all i've done",
    "i'll be so hurt",
    "nobody understands me like you",
    "you don't care about me",
    "you never help when i need you",
];

const OVERSTEPPING_PATTERNS: &[&str] = &[
    r"(?i)why are you.*\?",
    r"(?i)what were you.*\?",
    r"(?i)have you.*yet\?",
    r"(?i)tell me about your.*\?",
    r"(?i)how much do you.*\?",
    r"(?i)aren't you.*\?",
    r"(?i)shouldn't you.*\?",
    r"(?i)when are you going to.*\?",
    r"(?i)don't you think.*\?",
];

const SENSITIVE_TOPICS: &[&str] = &[
    "your family",
    "your relationship",
    "your salary",
    "your weight",
    "your dating",
    "your personal life",
    "why you're single",
    "why you don't have kids",
];

const URGENCY_PHRASES: &[&str] = &[
    "asap",
    "urgent",
    "immediately",
    "right now",
    "need it now",
    "cannot wait",
    "don't have time",
    "hurry",
    "quickly",
    "emergency",
    "critical",
    "important",
];

const GUILT_TRIP_RESPONSES: ResponseTemplates = ResponseTemplates {
    gentle: "I care about you, and I'm here to help when I can. Right now, I need to focus on my own needs too.",
    moderate: "I understand you're going through a lot. I can help, but I need to do it in a way that works for me too.",
    firm: "I need you to know that I'm not responsible for your emotions. I'm happy to help if I can, but not if it means sacrificing my wellbeing.",
};

const OVERSTEPPING_RESPONSES: ResponseTemplates = ResponseTemplates {
    gentle: "That's pretty personal. I'd prefer to keep that private.",
    moderate: "I appreciate the interest, but that's not something I'm comfortable discussing.",
    firm: "That's not something I discuss. If you have work-related questions, I'm happy to help with those.",
};

const AFTER_HOURS_RESPONSES: ResponseTemplates = ResponseTemplates {
    gentle: "I'll get to this during work hours tomorrow. Thanks for understanding!",
    moderate: "I appreciate the urgency, but I only respond to work requests during business hours to maintain balance.",
    firm: "I don't respond to work requests after 6 PM or before 8 AM. I'll get back to you during business hours.",
};

const REPEATED_PUSHING_RESPONSES: ResponseTemplates = ResponseTemplates {
    gentle: "I've noticed this is a pattern. Can we talk about how we work together?",
    moderate: "This keeps happening even after I've pushed back. I need you to respect my limits.",
    firm: "I've told you multiple times what my boundaries are. If you can't respect them, I need to reconsider this relationship.",
};

/// Local working hours. Anything outside `[start_hour, end_hour)` is after hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for WorkHours {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 18,
        }
    }
}

impl WorkHours {
    pub fn is_after_hours(&self, hour: u32) -> bool {
        hour >= self.end_hour || hour < self.start_hour
    }
}

/// Result of the repeated-pushing check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedPushing {
    pub detected: bool,
    pub severity: Severity,
    pub explanation: String,
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// Severity a `repeated_pushing` violation carries for a prior count, `None`
/// below two.
pub fn repeated_pushing_severity(violation_count: u32) -> Option<Severity> {
    match violation_count {
        0 | 1 => None,
        2 => Some(Severity::Medium),
        _ => Some(Severity::High),
    }
}

/// Classify a sender's prior violation count over the trailing window.
pub fn detect_repeated_pushing(violation_count: u32, window_days: u32) -> RepeatedPushing {
    match violation_count {
        0 => RepeatedPushing {
            detected: false,
            severity: Severity::Low,
            explanation: String::new(),
        },
        1 => RepeatedPushing {
            detected: false,
            severity: Severity::Low,
            explanation: "First violation from this sender".to_string(),
        },
        2 => RepeatedPushing {
            detected: true,
            severity: Severity::Medium,
            explanation: format!(
                "This is the 2nd boundary violation from this person in the last {window_days} days."
            ),
        },
        n => RepeatedPushing {
            detected: true,
            severity: Severity::High,
            explanation: format!(
                "This is the {} boundary violation from this person in the last {window_days} days. \
                 This is a repeat pattern.",
                ordinal(n)
            ),
        },
    }
}

fn repeated_pushing_guidance(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "This person has crossed your boundaries before.",
        Severity::Medium => "This person regularly violates your boundaries.",
        Severity::High => {
            "This person is a repeat boundary violator. Consider having a direct conversation about expectations."
        }
    }
}

struct GuiltRule {
    phrase: &'static str,
    sentence: Regex,
}

/// Rule-based boundary violation detector.
pub struct BoundaryRuleEngine {
    guilt_rules: Vec<GuiltRule>,
    overstepping: Vec<Regex>,
    request: Regex,
    work_hours: WorkHours,
    history_window_days: u32,
}

impl BoundaryRuleEngine {
    /// Create an engine with the default phrase tables.
    pub fn new(work_hours: WorkHours, history_window_days: u32) -> Self {
        let guilt_rules = GUILT_TRIP_PHRASES
            .iter()
            .map(|&phrase| GuiltRule {
                phrase,
                sentence: Regex::new(&format!(
                    r"(?i)[^.!?]*{}[^.!?]*[.!?]?",
                    regex::escape(phrase)
                ))
                .unwrap(),
            })
            .collect();

        let overstepping = OVERSTEPPING_PATTERNS
            .iter()
            .map(|p| Regex::new(p).unwrap())
            .collect();

        Self {
            guilt_rules,
            overstepping,
            request: Regex::new(r"(?i)can you|could you|will you|please|help").unwrap(),
            work_hours,
            history_window_days,
        }
    }

    /// Run every sub-detector. Output order: guilt-tripping, overstepping,
    /// after-hours pressure, repeated pushing.
    pub fn evaluate(
        &self,
        message: &str,
        local_time: DateTime<FixedOffset>,
        prior_violation_count: u32,
    ) -> Vec<BoundaryViolation> {
        let mut violations = Vec::new();

        let guilt = self.guilt_tripping_evidence(message);
        if !guilt.is_empty() {
            violations.push(BoundaryViolation::new(
                ViolationType::GuiltTripping,
                Severity::Medium,
                "This message uses emotional manipulation or guilt-tripping to get compliance. \
                 It's okay to set boundaries even if someone \"really needs\" you.",
                guilt,
                GUILT_TRIP_RESPONSES,
            ));
        }

        let overstepping = self.overstepping_evidence(message);
        if !overstepping.is_empty() {
            violations.push(BoundaryViolation::new(
                ViolationType::Overstepping,
                Severity::Medium,
                "This message asks invasive personal questions or makes assumptions about your life. \
                 You don't owe anyone explanations about your private matters.",
                overstepping,
                OVERSTEPPING_RESPONSES,
            ));
        }

        let after_hours = self.after_hours_evidence(message, local_time);
        if !after_hours.is_empty() {
            violations.push(BoundaryViolation::new(
                ViolationType::AfterHoursPressure,
                Severity::Medium,
                format!(
                    "This request came after work hours ({}). It's healthy to have boundaries around \
                     work time. You don't have to respond immediately.",
                    local_time.format("%H:%M")
                ),
                after_hours,
                AFTER_HOURS_RESPONSES,
            ));
        }

        let pushing = detect_repeated_pushing(prior_violation_count, self.history_window_days);
        if pushing.detected {
            violations.push(BoundaryViolation::new(
                ViolationType::RepeatedPushing,
                pushing.severity,
                format!(
                    "{} {}",
                    pushing.explanation,
                    repeated_pushing_guidance(pushing.severity)
                ),
                vec![format!(
                    "{prior_violation_count} boundary violations in the last {} days from this sender",
                    self.history_window_days
                )],
                REPEATED_PUSHING_RESPONSES,
            ));
        }

        debug!(
            count = violations.len(),
            prior_violation_count, "Rule engine evaluation complete"
        );
        violations
    }

    fn guilt_tripping_evidence(&self, message: &str) -> Vec<String> {
        let lower = message.to_lowercase();
        let mut evidence = Vec::new();

        for rule in &self.guilt_rules {
            if !lower.contains(rule.phrase) {
                continue;
            }
            if let Some(m) = rule.sentence.find(message) {
                evidence.push(format!("\"{}\"", m.as_str().trim()));
            }
        }

        if evidence.is_empty() && lower.contains("!!") {
            evidence.push("Multiple exclamation marks for emotional intensity".to_string());
        }
        if evidence.is_empty() && lower.contains("??") {
            evidence.push("Multiple question marks suggesting desperation".to_string());
        }

        evidence
    }

    fn overstepping_evidence(&self, message: &str) -> Vec<String> {
        let mut evidence: Vec<String> = self
            .overstepping
            .iter()
            .filter_map(|re| re.find(message))
            .map(|m| format!("\"{}\" - pressuring personal question", m.as_str()))
            .collect();

        let lower = message.to_lowercase();
        for topic in SENSITIVE_TOPICS {
            if lower.contains(topic) {
                evidence.push(format!("Asking about private topic: {topic}"));
            }
        }

        evidence
    }

    fn after_hours_evidence(
        &self,
        message: &str,
        local_time: DateTime<FixedOffset>,
    ) -> Vec<String> {
        if !self.work_hours.is_after_hours(local_time.hour()) {
            return Vec::new();
        }

        let lower = message.to_lowercase();
        let mut evidence: Vec<String> = URGENCY_PHRASES
            .iter()
            .filter(|phrase| lower.contains(*phrase))
            .map(|phrase| format!("Urgent pressure: \"{phrase}\""))
            .collect();

        if self.request.is_match(message) {
            evidence.push(format!(
                "Request sent outside work hours ({})",
                local_time.format("%H:%M")
            ));
        }

        evidence
    }
}

impl Default for BoundaryRuleEngine {
    fn default() -> Self {
        Self::new(WorkHours::default(), 30)
    }
}
