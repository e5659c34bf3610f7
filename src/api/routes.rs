use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApiError, AppState};
use crate::auth::bearer_token;
use crate::detection::{BoundaryViolation, DetectionRequest, Trigger};
use crate::profile::{MIN_MESSAGES_FOR_CONTEXT, SenderProfile, sender_context};
use crate::store::NewFeedback;

// ── Health ──────────────────────────────────────────────────────────────

pub(super) async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "boundary-sentinel"
    }))
}

async fn caller(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header_value)?;
    Ok(state.auth.authenticate(token).await?)
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

// ── Detection ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DetectBody {
    message_id: Option<String>,
    message_body: Option<String>,
    sender_id: Option<String>,
    /// Unix seconds.
    message_timestamp: Option<i64>,
    sender_utc_offset_minutes: Option<i32>,
}

impl DetectBody {
    fn into_request(self, user_id: String) -> Result<DetectionRequest, ApiError> {
        Ok(DetectionRequest {
            message_id: required(self.message_id, "messageId")?,
            message_body: required(self.message_body, "messageBody")?,
            sender_id: required(self.sender_id, "senderId")?,
            user_id,
            message_timestamp: self
                .message_timestamp
                .ok_or_else(|| ApiError::BadRequest("messageTimestamp is required".into()))?,
            sender_utc_offset_minutes: self.sender_utc_offset_minutes,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DetectResponse {
    success: bool,
    violations: Vec<BoundaryViolation>,
    violation_count: usize,
    sender_violation_history: u32,
    is_repeat_offender: bool,
    triggers: Vec<Trigger>,
    analysis_id: Option<String>,
}

pub(super) async fn detect(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<DetectBody>, JsonRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let user_id = caller(&state, &headers).await?;
    let Json(body) = body?;
    let request = body.into_request(user_id)?;

    let report = state.detector.detect(&request, Utc::now()).await?;
    let persisted = state.detector.record(&request, &report).await;
    if persisted.records_failed > 0 {
        warn!(
            message_id = %request.message_id,
            failed = persisted.records_failed,
            "Some violation records were not stored"
        );
    }

    Ok(Json(DetectResponse {
        success: true,
        violation_count: report.violations.len(),
        violations: report.violations,
        sender_violation_history: report.sender_violation_history,
        is_repeat_offender: report.is_repeat_offender,
        triggers: report.triggers,
        analysis_id: persisted.analysis_id,
    }))
}

// ── Sender patterns ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PatternsBody {
    sender_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PatternsResponse {
    success: bool,
    profile: SenderProfile,
    context: String,
    has_data: bool,
}

pub(super) async fn sender_patterns(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PatternsBody>, JsonRejection>,
) -> Result<Json<PatternsResponse>, ApiError> {
    let user_id = caller(&state, &headers).await?;
    let Json(body) = body?;
    let sender_id = required(body.sender_id, "senderId")?;

    let profile = state
        .detector
        .sender_profile(&user_id, &sender_id, Utc::now())
        .await?;
    let context = sender_context(&profile);
    let has_data = profile.total_messages as usize >= MIN_MESSAGES_FOR_CONTEXT;

    Ok(Json(PatternsResponse {
        success: true,
        profile,
        context,
        has_data,
    }))
}

// ── Feedback ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FeedbackBody {
    analysis_id: Option<String>,
    message_id: Option<String>,
    sender_id: Option<String>,
    user_chosen_interpretation: Option<String>,
    was_helpful: Option<bool>,
    /// Unix seconds; defaults to the time of submission.
    feedback_timestamp: Option<i64>,
}

impl FeedbackBody {
    fn into_feedback(self, user_id: String, now: DateTime<Utc>) -> Result<NewFeedback, ApiError> {
        let analysis_id = required(self.analysis_id, "analysisId")?;
        let message_id = required(self.message_id, "messageId")?;
        let sender_id = required(self.sender_id, "senderId")?;
        let chosen_interpretation = self
            .user_chosen_interpretation
            .filter(|v| !v.trim().is_empty());
        if chosen_interpretation.is_none() && self.was_helpful.is_none() {
            return Err(ApiError::BadRequest(
                "userChosenInterpretation or wasHelpful is required".into(),
            ));
        }
        let feedback_at = match self.feedback_timestamp {
            Some(ts) => DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                ApiError::BadRequest(format!("feedbackTimestamp {ts} is out of range"))
            })?,
            None => now,
        };

        Ok(NewFeedback {
            analysis_id,
            message_id,
            sender_id,
            user_id,
            chosen_interpretation,
            was_helpful: self.was_helpful,
            feedback_at,
        })
    }
}

pub(super) async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FeedbackBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = caller(&state, &headers).await?;
    let Json(body) = body?;
    let feedback = body.into_feedback(user_id, Utc::now())?;

    let feedback_id = state.db.insert_feedback(&feedback).await?;
    info!(
        analysis_id = %feedback.analysis_id,
        sender = %feedback.sender_id,
        "Feedback recorded"
    );

    Ok(Json(serde_json::json!({ "feedbackId": feedback_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect_body(json: serde_json::Value) -> DetectBody {
        serde_json::from_value(json).unwrap()
    }

    fn feedback_body(json: serde_json::Value) -> FeedbackBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn detect_body_maps_to_request() {
        let request = detect_body(serde_json::json!({
            "messageId": "m1",
            "messageBody": "ok",
            "senderId": "s1",
            "messageTimestamp": 1_737_932_400,
            "senderUtcOffsetMinutes": -300
        }))
        .into_request("alice".into())
        .unwrap();
        assert_eq!(request.message_id, "m1");
        assert_eq!(request.user_id, "alice");
        assert_eq!(request.message_timestamp, 1_737_932_400);
        assert_eq!(request.sender_utc_offset_minutes, Some(-300));
    }

    #[test]
    fn detect_body_rejects_missing_and_blank_fields() {
        let err = detect_body(serde_json::json!({
            "messageId": "m1",
            "messageBody": "   ",
            "senderId": "s1",
            "messageTimestamp": 0
        }))
        .into_request("alice".into())
        .unwrap_err();
        assert_eq!(err.message(), "messageBody is required");

        let err = detect_body(serde_json::json!({
            "messageId": "m1",
            "messageBody": "hi",
            "senderId": "s1"
        }))
        .into_request("alice".into())
        .unwrap_err();
        assert_eq!(err.message(), "messageTimestamp is required");
    }

    #[test]
    fn feedback_needs_interpretation_or_helpfulness() {
        let now = Utc::now();
        let err = feedback_body(serde_json::json!({
            "analysisId": "a1",
            "messageId": "m1",
            "senderId": "s1",
            "userChosenInterpretation": ""
        }))
        .into_feedback("alice".into(), now)
        .unwrap_err();
        assert!(err.message().contains("wasHelpful"));

        let feedback = feedback_body(serde_json::json!({
            "analysisId": "a1",
            "messageId": "m1",
            "senderId": "s1",
            "wasHelpful": false
        }))
        .into_feedback("alice".into(), now)
        .unwrap();
        assert_eq!(feedback.was_helpful, Some(false));
        assert_eq!(feedback.chosen_interpretation, None);
        assert_eq!(feedback.feedback_at, now);
    }

    #[test]
    fn feedback_timestamp_overrides_now() {
        let feedback = feedback_body(serde_json::json!({
            "analysisId": "a1",
            "messageId": "m1",
            "senderId": "s1",
            "userChosenInterpretation": "busy",
            "feedbackTimestamp": 1_700_000_000
        }))
        .into_feedback("alice".into(), Utc::now())
        .unwrap();
        assert_eq!(feedback.feedback_at.timestamp(), 1_700_000_000);
        assert_eq!(feedback.chosen_interpretation.as_deref(), Some("busy"));
    }
}
