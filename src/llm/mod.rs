//! LLM integration.
//!
//! The fallback detector talks to an OpenAI-compatible chat completions
//! endpoint through the `LlmProvider` trait, so tests can swap in a mock.

pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Max characters of a model payload kept in errors and logs.
pub const PREVIEW_CHARS: usize = 500;

/// First `PREVIEW_CHARS` characters of a payload, marked when truncated.
pub fn payload_preview(raw: &str) -> String {
    match raw.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}\n... [truncated]", &raw[..cut]),
        None => raw.to_string(),
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiProvider::new(
        &config.base_url,
        config.api_key.clone(),
        &config.model,
        config.timeout,
    )?;
    tracing::info!(
        "Using OpenAI-compatible provider (model: {}, base_url: {})",
        config.model,
        config.base_url
    );
    Ok(Arc::new(provider))
}
