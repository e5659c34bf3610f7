//! Configuration types.
//!
//! Everything is read from environment variables once at start-up.
//! `from_lookup` takes the variable source as a closure so tests don't touch
//! the process environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::detection::{DetectorConfig, ToneIndicatorPolicy, WorkHours};
use crate::error::ConfigError;
use crate::llm::LlmConfig;

/// How bearer credentials are resolved to user ids.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// `GET` this URL with the caller's bearer token; expects `{"id": ...}`.
    Upstream { url: String },
    /// Fixed token → user id map for development and tests.
    Static { tokens: HashMap<String, String> },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub detection: DetectorConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("BOUNDARY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/boundary.db"));
        let port: u16 = parse_or(&var, "BOUNDARY_PORT", 8080)?;

        let api_key = var("OPENAI_API_KEY").ok_or_else(|| ConfigError::MissingRequired {
            key: "OPENAI_API_KEY".to_string(),
            hint: "Set it to an API key for the OpenAI-compatible endpoint.".to_string(),
        })?;
        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            model: var("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: var("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout: Duration::from_secs(parse_or(&var, "LLM_TIMEOUT_SECS", 20)?),
        };

        let auth = match (var("AUTH_URL"), var("AUTH_STATIC_TOKENS")) {
            (Some(url), _) => AuthConfig::Upstream { url },
            (None, Some(raw)) => AuthConfig::Static {
                tokens: parse_static_tokens(&raw)?,
            },
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    key: "AUTH_URL".to_string(),
                    hint: "Set AUTH_URL, or AUTH_STATIC_TOKENS=token:user,... for development."
                        .to_string(),
                });
            }
        };

        let work_hours = WorkHours {
            start_hour: parse_or(&var, "DETECTION_WORKDAY_START_HOUR", 8)?,
            end_hour: parse_or(&var, "DETECTION_WORKDAY_END_HOUR", 18)?,
        };
        if work_hours.start_hour >= work_hours.end_hour || work_hours.end_hour > 24 {
            return Err(ConfigError::InvalidValue {
                key: "DETECTION_WORKDAY_START_HOUR".to_string(),
                message: format!(
                    "work hours {}..{} must satisfy start < end <= 24",
                    work_hours.start_hour, work_hours.end_hour
                ),
            });
        }

        let detection = DetectorConfig {
            tone_policy: parse_or(
                &var,
                "DETECTION_TONE_INDICATOR_POLICY",
                ToneIndicatorPolicy::default(),
            )?,
            work_hours,
            default_utc_offset_minutes: parse_or(&var, "DETECTION_DEFAULT_UTC_OFFSET_MINUTES", 0)?,
            history_window_days: parse_or(&var, "DETECTION_HISTORY_WINDOW_DAYS", 30)?,
            profile_window_days: parse_or(&var, "PROFILE_WINDOW_DAYS", 90)?,
        };

        Ok(Self {
            db_path,
            port,
            llm,
            auth,
            detection,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse `token:user,token2:user2`.
fn parse_static_tokens(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((token, user)) if !token.trim().is_empty() && !user.trim().is_empty() => {
                Ok((token.trim().to_string(), user.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue {
                key: "AUTH_STATIC_TOKENS".to_string(),
                message: "expected comma-separated token:user pairs".to_string(),
            }),
        })
        .collect()
}
