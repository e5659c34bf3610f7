//! `Database` trait: single async interface for all persistence.
//!
//! Violations and analyses are append-only. Violation patterns are mutated
//! only through `upsert_violation_pattern`, which the backend must implement
//! as a single atomic statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detection::types::{BoundaryViolation, Severity, ViolationType};
use crate::error::DatabaseError;

/// A persisted boundary violation.
#[derive(Debug, Clone)]
pub struct ViolationRecord {
    pub id: String,
    pub message_id: String,
    pub sender_id: String,
    pub user_id: String,
    pub violation: BoundaryViolation,
    pub is_after_hours: bool,
    pub message_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Direction of severity between consecutive violations of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTrend {
    /// First recorded occurrence.
    Initial,
    Escalating,
    Stable,
    DeEscalating,
}

impl SeverityTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Escalating => "escalating",
            Self::Stable => "stable",
            Self::DeEscalating => "de_escalating",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "escalating" => Self::Escalating,
            "stable" => Self::Stable,
            "de_escalating" => Self::DeEscalating,
            _ => Self::Initial,
        }
    }
}

/// Rolling aggregate keyed by (user, sender, violation type).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationPattern {
    pub id: String,
    pub user_id: String,
    pub sender_id: String,
    pub violation_type: ViolationType,
    pub occurrence_count: u32,
    pub last_violation_at: DateTime<Utc>,
    pub last_severity: Severity,
    pub is_repeat_offender: bool,
    pub severity_trend: SeverityTrend,
}

/// Triggers found for one analyzed message. Feedback links back to it.
#[derive(Debug, Clone)]
pub struct MessageAnalysis {
    pub id: String,
    pub message_id: String,
    pub sender_id: String,
    pub user_id: String,
    /// Trigger pattern names in detection order.
    pub trigger_patterns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Feedback to be inserted.
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub analysis_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub user_id: String,
    pub chosen_interpretation: Option<String>,
    pub was_helpful: Option<bool>,
    pub feedback_at: DateTime<Utc>,
}

/// A stored feedback row, joined with the first trigger pattern of its
/// analysis when the analysis exists.
#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    pub id: String,
    pub analysis_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub user_id: String,
    pub chosen_interpretation: Option<String>,
    pub was_helpful: Option<bool>,
    pub feedback_at: DateTime<Utc>,
    pub trigger_pattern: Option<String>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Violations ──────────────────────────────────────────────────

    /// Append one violation. Returns the generated record id.
    async fn insert_violation(
        &self,
        message_id: &str,
        sender_id: &str,
        user_id: &str,
        violation: &BoundaryViolation,
        message_timestamp: DateTime<Utc>,
    ) -> Result<String, DatabaseError>;

    /// Count violations from `sender_id` to `user_id` with a message
    /// timestamp at or after `since`.
    async fn count_violations_since(
        &self,
        user_id: &str,
        sender_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, DatabaseError>;

    /// All violations for a (user, sender) pair, oldest first.
    async fn list_violations(
        &self,
        user_id: &str,
        sender_id: &str,
    ) -> Result<Vec<ViolationRecord>, DatabaseError>;

    // ── Violation patterns ──────────────────────────────────────────

    /// Create the pattern with count 1, or atomically increment it.
    async fn upsert_violation_pattern(
        &self,
        user_id: &str,
        sender_id: &str,
        violation_type: ViolationType,
        severity: Severity,
        violation_at: DateTime<Utc>,
    ) -> Result<ViolationPattern, DatabaseError>;

    async fn get_violation_pattern(
        &self,
        user_id: &str,
        sender_id: &str,
        violation_type: ViolationType,
    ) -> Result<Option<ViolationPattern>, DatabaseError>;

    // ── Analyses & feedback ─────────────────────────────────────────

    /// Record the triggers found for a message. Returns the analysis id.
    async fn insert_analysis(
        &self,
        message_id: &str,
        sender_id: &str,
        user_id: &str,
        trigger_patterns: &[String],
    ) -> Result<String, DatabaseError>;

    async fn get_analysis(&self, id: &str) -> Result<Option<MessageAnalysis>, DatabaseError>;

    /// Append feedback. Returns the feedback id.
    async fn insert_feedback(&self, feedback: &NewFeedback) -> Result<String, DatabaseError>;

    /// Feedback for a (user, sender) pair at or after `since`, oldest first.
    async fn list_feedback_for_sender(
        &self,
        user_id: &str,
        sender_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FeedbackRecord>, DatabaseError>;
}
