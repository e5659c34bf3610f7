//! Error types for the boundary detection service.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Caller identity resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Auth service unavailable: {0}")]
    Upstream(String),
}

/// Failures of the model-assisted fallback detector.
///
/// Every variant is advisory: the detector logs it and continues with zero
/// fallback violations.
#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("Model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to parse JSON response: {reason}\nResponse preview: {preview}")]
    MalformedJson { reason: String, preview: String },

    #[error("Response does not match the violation schema: {reason}\nResponse preview: {preview}")]
    Schema { reason: String, preview: String },
}

impl FallbackError {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Llm(_) => "llm_call",
            Self::MalformedJson { .. } => "malformed_json",
            Self::Schema { .. } => "schema_mismatch",
        }
    }
}

/// Invalid detection input.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Message timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("UTC offset of {0} minutes is out of range")]
    InvalidUtcOffset(i32),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
