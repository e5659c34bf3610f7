//! OpenAI-compatible chat completions client.
//!
//! Talks to any server exposing `POST {base_url}/chat/completions` (OpenAI,
//! vLLM, Ollama, ...). One HTTP request per call, bounded by the configured
//! timeout, no retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::payload_preview;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "openai";

/// OpenAI-compatible provider.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn request_failed(reason: impl Into<String>) -> LlmError {
    LlmError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_output.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(LlmError::AuthFailed {
                        provider: PROVIDER.to_string(),
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .headers()
                        .get(header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    return Err(LlmError::RateLimited {
                        provider: PROVIDER.to_string(),
                        retry_after,
                    });
                }
                _ => {
                    let text = response.text().await.unwrap_or_default();
                    return Err(request_failed(format!(
                        "HTTP {status}: {}",
                        payload_preview(&text)
                    )));
                }
            }
        }

        let chat: ChatResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "No choices in response".to_string(),
            })?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        };

        let (input_tokens, output_tokens) = chat
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens,
            output_tokens,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;

    #[derive(Clone)]
    struct Stub {
        status: axum::http::StatusCode,
        body: Value,
        seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn handler(
        State(stub): State<Stub>,
        headers: HeaderMap,
        Json(req): Json<Value>,
    ) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        stub.seen.lock().unwrap().push((auth, req));
        (
            stub.status,
            [("retry-after", "7")],
            Json(stub.body.clone()),
        )
    }

    async fn spawn_stub(status: axum::http::StatusCode, body: Value) -> (String, Stub) {
        let stub = Stub {
            status,
            body,
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(handler))
            .with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1"), stub)
    }

    fn provider(base_url: &str) -> OpenAiProvider {
        OpenAiProvider::new(
            base_url,
            SecretString::from("sk-test"),
            "gpt-4o-mini",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::system("sys"), ChatMessage::user("hello")])
            .with_temperature(0.3)
            .with_max_tokens(500)
            .with_json_output()
    }

    #[tokio::test]
    async fn completes_and_sends_openai_request_shape() {
        let (url, stub) = spawn_stub(
            axum::http::StatusCode::OK,
            json!({
                "choices": [{"message": {"content": "{\"violations\": []}"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 4}
            }),
        )
        .await;

        let response = provider(&url).complete(request()).await.unwrap();
        assert_eq!(response.content, "{\"violations\": []}");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 4);
        assert_eq!(response.finish_reason, FinishReason::Stop);

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 500);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_failed() {
        let (url, _) = spawn_stub(
            axum::http::StatusCode::UNAUTHORIZED,
            json!({"error": {"message": "bad key"}}),
        )
        .await;
        let err = provider(&url).complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let (url, _) = spawn_stub(axum::http::StatusCode::TOO_MANY_REQUESTS, json!({})).await;
        let err = provider(&url).complete(request()).await.unwrap_err();
        match err {
            LlmError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_invalid_response() {
        let (url, _) = spawn_stub(axum::http::StatusCode::OK, json!({"choices": []})).await;
        let err = provider(&url).complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn server_error_body_is_truncated() {
        let (url, _) = spawn_stub(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "x".repeat(5000)}),
        )
        .await;
        let err = provider(&url).complete(request()).await.unwrap_err();
        match err {
            LlmError::RequestFailed { reason, .. } => {
                assert!(reason.starts_with("HTTP 500"));
                assert!(reason.ends_with("... [truncated]"));
                assert!(reason.len() < 600);
            }
            other => panic!("expected request failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_request_failed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = provider(&format!("http://{addr}/v1"))
            .complete(request())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }
}
