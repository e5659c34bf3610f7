//! Bearer-token authentication.
//!
//! Every API route resolves the caller's `Authorization: Bearer <token>`
//! header to a user id before touching detection state. Production deployments
//! delegate to an upstream identity service; development uses a static map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::error::AuthError;

/// Resolves a bearer token to a user id.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<String, AuthError>;
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingCredential)?.trim();
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingCredential)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingCredential);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    Ok(token)
}

/// Build the authenticator named by the configuration.
pub fn create_authenticator(
    config: &AuthConfig,
    timeout: Duration,
) -> Result<Arc<dyn Authenticator>, AuthError> {
    match config {
        AuthConfig::Upstream { url } => {
            tracing::info!("Authenticating against {}", url);
            Ok(Arc::new(HttpAuthenticator::new(url.clone(), timeout)?))
        }
        AuthConfig::Static { tokens } => {
            tracing::warn!(
                "Using static bearer tokens ({} configured); not for production",
                tokens.len()
            );
            Ok(Arc::new(StaticTokenAuthenticator::new(tokens.clone())))
        }
    }
}

/// Calls `GET {url}` with the caller's bearer token and reads `{"id": ...}`.
pub struct HttpAuthenticator {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

impl HttpAuthenticator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Upstream(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::InvalidCredential);
            }
            status if !status.is_success() => {
                return Err(AuthError::Upstream(format!("auth service returned {status}")));
            }
            _ => {}
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("unreadable auth response: {e}")))?;
        if user.id.trim().is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        Ok(user.id)
    }
}

/// Fixed token → user id map.
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}
