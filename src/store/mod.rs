//! Persistence layer: libSQL-backed storage for violations, violation
//! patterns, message analyses and feedback.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, FeedbackRecord, MessageAnalysis, NewFeedback, SeverityTrend, ViolationPattern,
    ViolationRecord,
};
