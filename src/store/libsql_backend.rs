//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Message and feedback
//! timestamps are stored as unix seconds so window queries are plain integer
//! comparisons; bookkeeping columns (`created_at`, `updated_at`) are RFC 3339.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::detection::types::{BoundaryViolation, Severity, ViolationType};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, FeedbackRecord, MessageAnalysis, NewFeedback, SeverityTrend, ViolationPattern,
    ViolationRecord,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_bool(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(b as i64),
        None => libsql::Value::Null,
    }
}

fn get_opt_text(row: &libsql::Row, idx: i32) -> Result<Option<String>, libsql::Error> {
    match row.get_value(idx)? {
        libsql::Value::Text(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn get_opt_bool(row: &libsql::Row, idx: i32) -> Result<Option<bool>, libsql::Error> {
    match row.get_value(idx)? {
        libsql::Value::Integer(i) => Ok(Some(i != 0)),
        _ => Ok(None),
    }
}

fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, DatabaseError> {
    s.parse::<T>().map_err(DatabaseError::Serialization)
}

fn row_to_violation(row: &libsql::Row) -> Result<ViolationRecord, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("violation row parse: {e}"));

    let type_str: String = row.get(4).map_err(read)?;
    let severity_str: String = row.get(5).map_err(read)?;
    let evidence_json: String = row.get(7).map_err(read)?;
    let evidence: Vec<String> = serde_json::from_str(&evidence_json)
        .map_err(|e| DatabaseError::Serialization(format!("violation evidence: {e}")))?;
    let is_after_hours: i64 = row.get(11).map_err(read)?;
    let message_ts: i64 = row.get(12).map_err(read)?;
    let created_str: String = row.get(13).map_err(read)?;

    Ok(ViolationRecord {
        id: row.get(0).map_err(read)?,
        message_id: row.get(1).map_err(read)?,
        sender_id: row.get(2).map_err(read)?,
        user_id: row.get(3).map_err(read)?,
        violation: BoundaryViolation {
            violation_type: parse_enum(&type_str)?,
            severity: parse_enum(&severity_str)?,
            explanation: row.get(6).map_err(read)?,
            evidence,
            suggested_gentle: row.get(8).map_err(read)?,
            suggested_moderate: row.get(9).map_err(read)?,
            suggested_firm: row.get(10).map_err(read)?,
        },
        is_after_hours: is_after_hours != 0,
        message_timestamp: from_unix(message_ts),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_pattern(row: &libsql::Row) -> Result<ViolationPattern, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("pattern row parse: {e}"));

    let type_str: String = row.get(3).map_err(read)?;
    let count: i64 = row.get(4).map_err(read)?;
    let last_at: i64 = row.get(5).map_err(read)?;
    let severity_str: String = row.get(6).map_err(read)?;
    let repeat: i64 = row.get(7).map_err(read)?;
    let trend_str: String = row.get(8).map_err(read)?;

    Ok(ViolationPattern {
        id: row.get(0).map_err(read)?,
        user_id: row.get(1).map_err(read)?,
        sender_id: row.get(2).map_err(read)?,
        violation_type: parse_enum(&type_str)?,
        occurrence_count: u32::try_from(count).unwrap_or(u32::MAX),
        last_violation_at: from_unix(last_at),
        last_severity: parse_enum(&severity_str)?,
        is_repeat_offender: repeat != 0,
        severity_trend: SeverityTrend::parse(&trend_str),
    })
}

fn row_to_feedback(row: &libsql::Row) -> Result<FeedbackRecord, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("feedback row parse: {e}"));

    let feedback_at: i64 = row.get(7).map_err(read)?;
    let trigger_pattern = match get_opt_text(row, 8).map_err(read)? {
        Some(json) => serde_json::from_str::<Vec<String>>(&json)
            .map_err(|e| DatabaseError::Serialization(format!("trigger patterns: {e}")))?
            .into_iter()
            .next(),
        None => None,
    };

    Ok(FeedbackRecord {
        id: row.get(0).map_err(read)?,
        analysis_id: row.get(1).map_err(read)?,
        message_id: row.get(2).map_err(read)?,
        sender_id: row.get(3).map_err(read)?,
        user_id: row.get(4).map_err(read)?,
        chosen_interpretation: get_opt_text(row, 5).map_err(read)?,
        was_helpful: get_opt_bool(row, 6).map_err(read)?,
        feedback_at: from_unix(feedback_at),
        trigger_pattern,
    })
}

// ── Trait implementation ────────────────────────────────────────────

const VIOLATION_COLUMNS: &str = "id, message_id, sender_id, user_id, violation_type, severity, \
     explanation, evidence, suggested_gentle, suggested_moderate, suggested_firm, \
     is_after_hours, message_timestamp, created_at";

const PATTERN_COLUMNS: &str = "id, user_id, sender_id, violation_type, occurrence_count, \
     last_violation_at, last_severity, is_repeat_offender, severity_trend";

/// Atomic create-or-increment. Severity trend compares the incoming severity
/// with the stored `last_severity` by ordinal.
const UPSERT_PATTERN_SQL: &str = "
    INSERT INTO violation_patterns (id, user_id, sender_id, violation_type, occurrence_count,
        last_violation_at, last_severity, is_repeat_offender, severity_trend, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, 0, 'initial', ?7, ?7)
    ON CONFLICT (user_id, sender_id, violation_type) DO UPDATE SET
        occurrence_count = violation_patterns.occurrence_count + 1,
        last_violation_at = excluded.last_violation_at,
        last_severity = excluded.last_severity,
        is_repeat_offender = (violation_patterns.occurrence_count + 1) >= 3,
        severity_trend = CASE
            WHEN (CASE excluded.last_severity WHEN 'low' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END)
               > (CASE violation_patterns.last_severity WHEN 'low' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END)
                THEN 'escalating'
            WHEN (CASE excluded.last_severity WHEN 'low' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END)
               < (CASE violation_patterns.last_severity WHEN 'low' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END)
                THEN 'de_escalating'
            ELSE 'stable'
        END,
        updated_at = excluded.updated_at
    RETURNING id, user_id, sender_id, violation_type, occurrence_count,
        last_violation_at, last_severity, is_repeat_offender, severity_trend
";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Violations ──────────────────────────────────────────────────

    async fn insert_violation(
        &self,
        message_id: &str,
        sender_id: &str,
        user_id: &str,
        violation: &BoundaryViolation,
        message_timestamp: DateTime<Utc>,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let evidence = serde_json::to_string(&violation.evidence)
            .map_err(|e| DatabaseError::Serialization(format!("violation evidence: {e}")))?;
        let is_after_hours = violation.violation_type == ViolationType::AfterHoursPressure;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO violations ({VIOLATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    id.clone(),
                    message_id,
                    sender_id,
                    user_id,
                    violation.violation_type.as_str(),
                    violation.severity.as_str(),
                    violation.explanation.clone(),
                    evidence,
                    violation.suggested_gentle.clone(),
                    violation.suggested_moderate.clone(),
                    violation.suggested_firm.clone(),
                    is_after_hours as i64,
                    message_timestamp.timestamp(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_violation: {e}")))?;

        debug!(
            id = %id,
            message_id,
            violation_type = %violation.violation_type,
            "Violation recorded"
        );
        Ok(id)
    }

    async fn count_violations_since(
        &self,
        user_id: &str,
        sender_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM violations
                 WHERE user_id = ?1 AND sender_id = ?2 AND message_timestamp >= ?3",
                params![user_id, sender_id, since.timestamp()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_violations_since: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count row parse: {e}")))?;
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_violations_since: {e}"))),
        }
    }

    async fn list_violations(
        &self,
        user_id: &str,
        sender_id: &str,
    ) -> Result<Vec<ViolationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VIOLATION_COLUMNS} FROM violations
                     WHERE user_id = ?1 AND sender_id = ?2
                     ORDER BY message_timestamp ASC, created_at ASC"
                ),
                params![user_id, sender_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_violations: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_violations: {e}")))?
        {
            records.push(row_to_violation(&row)?);
        }
        Ok(records)
    }

    // ── Violation patterns ──────────────────────────────────────────

    async fn upsert_violation_pattern(
        &self,
        user_id: &str,
        sender_id: &str,
        violation_type: ViolationType,
        severity: Severity,
        violation_at: DateTime<Utc>,
    ) -> Result<ViolationPattern, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                UPSERT_PATTERN_SQL,
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    sender_id,
                    violation_type.as_str(),
                    violation_at.timestamp(),
                    severity.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_violation_pattern: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_violation_pattern: {e}")))?
            .ok_or_else(|| {
                DatabaseError::Query("upsert_violation_pattern returned no row".to_string())
            })?;

        let pattern = row_to_pattern(&row)?;
        debug!(
            sender_id,
            violation_type = %violation_type,
            count = pattern.occurrence_count,
            "Violation pattern updated"
        );
        Ok(pattern)
    }

    async fn get_violation_pattern(
        &self,
        user_id: &str,
        sender_id: &str,
        violation_type: ViolationType,
    ) -> Result<Option<ViolationPattern>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PATTERN_COLUMNS} FROM violation_patterns
                     WHERE user_id = ?1 AND sender_id = ?2 AND violation_type = ?3"
                ),
                params![user_id, sender_id, violation_type.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_violation_pattern: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_pattern(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_violation_pattern: {e}"))),
        }
    }

    // ── Analyses & feedback ─────────────────────────────────────────

    async fn insert_analysis(
        &self,
        message_id: &str,
        sender_id: &str,
        user_id: &str,
        trigger_patterns: &[String],
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let patterns = serde_json::to_string(trigger_patterns)
            .map_err(|e| DatabaseError::Serialization(format!("trigger patterns: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO message_analyses (id, message_id, sender_id, user_id, trigger_patterns, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.clone(),
                    message_id,
                    sender_id,
                    user_id,
                    patterns,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_analysis: {e}")))?;

        debug!(id = %id, message_id, "Analysis recorded");
        Ok(id)
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<MessageAnalysis>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, message_id, sender_id, user_id, trigger_patterns, created_at
                 FROM message_analyses WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_analysis: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_analysis: {e}"))),
        };

        let read = |e: libsql::Error| DatabaseError::Query(format!("analysis row parse: {e}"));
        let patterns_json: String = row.get(4).map_err(read)?;
        let created_str: String = row.get(5).map_err(read)?;

        Ok(Some(MessageAnalysis {
            id: row.get(0).map_err(read)?,
            message_id: row.get(1).map_err(read)?,
            sender_id: row.get(2).map_err(read)?,
            user_id: row.get(3).map_err(read)?,
            trigger_patterns: serde_json::from_str(&patterns_json)
                .map_err(|e| DatabaseError::Serialization(format!("trigger patterns: {e}")))?,
            created_at: parse_datetime(&created_str),
        }))
    }

    async fn insert_feedback(&self, feedback: &NewFeedback) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();

        self.conn()
            .execute(
                "INSERT INTO analysis_feedback (id, analysis_id, message_id, sender_id, user_id,
                    chosen_interpretation, was_helpful, feedback_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.clone(),
                    feedback.analysis_id.clone(),
                    feedback.message_id.clone(),
                    feedback.sender_id.clone(),
                    feedback.user_id.clone(),
                    opt_text(feedback.chosen_interpretation.as_deref()),
                    opt_bool(feedback.was_helpful),
                    feedback.feedback_at.timestamp(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_feedback: {e}")))?;

        debug!(id = %id, analysis_id = %feedback.analysis_id, "Feedback recorded");
        Ok(id)
    }

    async fn list_feedback_for_sender(
        &self,
        user_id: &str,
        sender_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FeedbackRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT f.id, f.analysis_id, f.message_id, f.sender_id, f.user_id,
                        f.chosen_interpretation, f.was_helpful, f.feedback_at, a.trigger_patterns
                 FROM analysis_feedback f
                 LEFT JOIN message_analyses a ON a.id = f.analysis_id AND a.user_id = f.user_id
                 WHERE f.user_id = ?1 AND f.sender_id = ?2 AND f.feedback_at >= ?3
                 ORDER BY f.feedback_at ASC, f.created_at ASC",
                params![user_id, sender_id, since.timestamp()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_feedback_for_sender: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_feedback_for_sender: {e}")))?
        {
            records.push(row_to_feedback(&row)?);
        }
        Ok(records)
    }
}
