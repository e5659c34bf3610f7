//! Detection pipeline orchestration.
//!
//! Two explicit steps:
//! - `detect` reads sender history, runs the trigger matcher and rule engine,
//!   and consults the model fallback only when the rules found nothing.
//!   Read-only apart from the model call.
//! - `record` appends the analysis and violations and bumps the violation
//!   pattern. Failures are collected in the `PersistenceReport`, never raised,
//!   so they cannot revoke an already computed detection.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::{debug, info, warn};

use crate::detection::fallback::{FallbackDetector, FallbackInput, FallbackOutcome};
use crate::detection::rules::{BoundaryRuleEngine, WorkHours};
use crate::detection::triggers::{ToneIndicatorPolicy, TriggerMatcher};
use crate::detection::types::{BoundaryViolation, Trigger};
use crate::error::{DatabaseError, DetectionError};
use crate::llm::LlmProvider;
use crate::profile::{SenderProfile, build_sender_profile, sender_context};
use crate::store::{Database, ViolationPattern};

/// Senders at or above this many violations in the window are repeat offenders.
pub const REPEAT_OFFENDER_THRESHOLD: u32 = 3;

/// Tunables for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    pub tone_policy: ToneIndicatorPolicy,
    pub work_hours: WorkHours,
    /// Used when a request carries no sender offset.
    pub default_utc_offset_minutes: i32,
    pub history_window_days: u32,
    pub profile_window_days: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            tone_policy: ToneIndicatorPolicy::default(),
            work_hours: WorkHours::default(),
            default_utc_offset_minutes: 0,
            history_window_days: 30,
            profile_window_days: 90,
        }
    }
}

/// One message to analyze on behalf of `user_id`.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub message_id: String,
    pub message_body: String,
    pub sender_id: String,
    pub user_id: String,
    /// Unix seconds.
    pub message_timestamp: i64,
    pub sender_utc_offset_minutes: Option<i32>,
}

/// Result of the detect step.
#[derive(Debug)]
pub struct DetectionReport {
    pub triggers: Vec<Trigger>,
    pub violations: Vec<BoundaryViolation>,
    /// Prior violations from this sender in the trailing window.
    pub sender_violation_history: u32,
    pub is_repeat_offender: bool,
    pub fallback: FallbackOutcome,
    pub message_time: DateTime<Utc>,
}

/// Result of the record step.
#[derive(Debug, Default)]
pub struct PersistenceReport {
    pub analysis_id: Option<String>,
    pub records_written: usize,
    pub records_failed: usize,
    /// `None` when there was nothing to aggregate.
    pub pattern: Option<Result<ViolationPattern, DatabaseError>>,
}

/// The hybrid boundary / RSD detection pipeline.
pub struct BoundaryDetector {
    db: Arc<dyn Database>,
    matcher: TriggerMatcher,
    rules: BoundaryRuleEngine,
    fallback: FallbackDetector,
    config: DetectorConfig,
}

impl BoundaryDetector {
    pub fn new(db: Arc<dyn Database>, llm: Arc<dyn LlmProvider>, config: DetectorConfig) -> Self {
        Self {
            db,
            matcher: TriggerMatcher::new(config.tone_policy),
            rules: BoundaryRuleEngine::new(config.work_hours, config.history_window_days),
            fallback: FallbackDetector::new(llm),
            config,
        }
    }

    /// Analyze one message. `now` anchors the history window.
    pub async fn detect(
        &self,
        request: &DetectionRequest,
        now: DateTime<Utc>,
    ) -> Result<DetectionReport, DetectionError> {
        let offset_minutes = request
            .sender_utc_offset_minutes
            .unwrap_or(self.config.default_utc_offset_minutes);
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(DetectionError::InvalidUtcOffset(offset_minutes))?;
        let message_time = DateTime::from_timestamp(request.message_timestamp, 0)
            .ok_or(DetectionError::InvalidTimestamp(request.message_timestamp))?;
        let local_time = message_time.with_timezone(&offset);

        let triggers = self.matcher.detect(&request.message_body);

        let since = now - Duration::days(i64::from(self.config.history_window_days));
        let history = match self
            .db
            .count_violations_since(&request.user_id, &request.sender_id, since)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    sender = %request.sender_id,
                    error = %e,
                    "Failed to load violation history, assuming none"
                );
                0
            }
        };

        let mut violations = self.rules.evaluate(&request.message_body, local_time, history);
        debug!(
            sender = %request.sender_id,
            rule_violations = violations.len(),
            triggers = triggers.len(),
            "Rule-based detection complete"
        );

        let fallback = if violations.is_empty() {
            let context = self
                .sender_context(&request.user_id, &request.sender_id, now)
                .await;
            let outcome = self
                .fallback
                .run(&FallbackInput {
                    message: &request.message_body,
                    prior_violation_count: history,
                    sender_context: &context,
                    triggers: &triggers,
                })
                .await;
            violations = outcome.violations().to_vec();
            outcome
        } else {
            FallbackOutcome::Skipped
        };

        info!(
            message_id = %request.message_id,
            sender = %request.sender_id,
            violations = violations.len(),
            history,
            fallback = fallback.label(),
            "Boundary detection complete"
        );

        Ok(DetectionReport {
            triggers,
            violations,
            sender_violation_history: history,
            is_repeat_offender: history >= REPEAT_OFFENDER_THRESHOLD,
            fallback,
            message_time,
        })
    }

    /// Persist a detection. Every write is attempted; failures are counted
    /// and logged.
    pub async fn record(
        &self,
        request: &DetectionRequest,
        report: &DetectionReport,
    ) -> PersistenceReport {
        let mut persisted = PersistenceReport::default();

        let patterns: Vec<String> = report.triggers.iter().map(|t| t.pattern.clone()).collect();
        match self
            .db
            .insert_analysis(
                &request.message_id,
                &request.sender_id,
                &request.user_id,
                &patterns,
            )
            .await
        {
            Ok(id) => persisted.analysis_id = Some(id),
            Err(e) => warn!(
                message_id = %request.message_id,
                error = %e,
                "Failed to store analysis"
            ),
        }

        for violation in &report.violations {
            match self
                .db
                .insert_violation(
                    &request.message_id,
                    &request.sender_id,
                    &request.user_id,
                    violation,
                    report.message_time,
                )
                .await
            {
                Ok(_) => persisted.records_written += 1,
                Err(e) => {
                    persisted.records_failed += 1;
                    warn!(
                        message_id = %request.message_id,
                        violation_type = %violation.violation_type,
                        error = %e,
                        "Failed to store violation"
                    );
                }
            }
        }

        if let Some(first) = report.violations.first() {
            let result = self
                .db
                .upsert_violation_pattern(
                    &request.user_id,
                    &request.sender_id,
                    first.violation_type,
                    first.severity,
                    report.message_time,
                )
                .await;
            if let Err(e) = &result {
                warn!(
                    sender = %request.sender_id,
                    error = %e,
                    "Failed to update violation pattern"
                );
            }
            persisted.pattern = Some(result);
        }

        persisted
    }

    /// Build the sender profile from feedback in the profile window.
    pub async fn sender_profile(
        &self,
        user_id: &str,
        sender_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SenderProfile, DatabaseError> {
        let since = now - Duration::days(i64::from(self.config.profile_window_days));
        let rows = self
            .db
            .list_feedback_for_sender(user_id, sender_id, since)
            .await?;
        Ok(build_sender_profile(sender_id, &rows))
    }

    /// Profile context for prompts; empty when unavailable.
    async fn sender_context(&self, user_id: &str, sender_id: &str, now: DateTime<Utc>) -> String {
        match self.sender_profile(user_id, sender_id, now).await {
            Ok(profile) => sender_context(&profile),
            Err(e) => {
                warn!(sender = %sender_id, error = %e, "Failed to load sender profile");
                String::new()
            }
        }
    }
}
