//! Integration tests for the detection HTTP API.
//!
//! Each test spins up the real router on a random port, backed by an
//! in-memory database, a stub OpenAI-compatible model server and static
//! bearer tokens, then exercises the REST contract with reqwest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use boundary_sentinel::api::{AppState, router};
use boundary_sentinel::auth::{Authenticator, StaticTokenAuthenticator};
use boundary_sentinel::detection::{BoundaryDetector, DetectorConfig};
use boundary_sentinel::llm::{LlmProvider, OpenAiProvider};
use boundary_sentinel::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const TOKEN: &str = "tok-alice";

/// What the stub model server answers with.
#[derive(Clone)]
struct ModelStub {
    reply: Arc<Mutex<(StatusCode, String)>>,
    calls: Arc<AtomicUsize>,
}

impl ModelStub {
    fn answer(&self, status: StatusCode, content: &str) {
        *self.reply.lock().unwrap() = (status, content.to_string());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn chat_completions(
    State(stub): State<ModelStub>,
    Json(_req): Json<Value>,
) -> impl IntoResponse {
    stub.calls.fetch_add(1, Ordering::SeqCst);
    let (status, content) = stub.reply.lock().unwrap().clone();
    (
        status,
        Json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        })),
    )
}

async fn spawn_model_stub() -> (String, ModelStub) {
    let stub = ModelStub {
        reply: Arc::new(Mutex::new((StatusCode::OK, r#"{"violations": []}"#.to_string()))),
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(stub.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), stub)
}

/// Start the service on a random port, return (base url, model stub).
async fn start_server() -> (String, ModelStub) {
    let (model_url, stub) = spawn_model_stub().await;
    let llm: Arc<dyn LlmProvider> = Arc::new(
        OpenAiProvider::new(
            model_url,
            SecretString::from("sk-test"),
            "gpt-4o-mini",
            Duration::from_secs(2),
        )
        .unwrap(),
    );
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let auth: Arc<dyn Authenticator> = Arc::new(StaticTokenAuthenticator::new(HashMap::from([(
        TOKEN.to_string(),
        "alice".to_string(),
    )])));
    let detector = Arc::new(BoundaryDetector::new(
        Arc::clone(&db),
        llm,
        DetectorConfig::default(),
    ));
    let app = router(AppState { detector, db, auth });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), stub)
}

/// Yesterday at the given UTC hour, as unix seconds. Recent enough to fall
/// inside the history window.
fn yesterday_at(hour: u32) -> i64 {
    (Utc::now() - chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp()
}

async fn post_json(url: &str, body: Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .bearer_auth(TOKEN)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.json().await.unwrap())
}

fn types(body: &Value) -> Vec<&str> {
    body["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["type"].as_str().unwrap())
        .collect()
}

const PUSHY: &str = "I really need you to respond ASAP. After all I've done, you owe me this.";

#[tokio::test]
async fn health_reports_ok() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn detect_requires_bearer_token() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();
        let body = json!({
            "messageId": "m1", "messageBody": "ok", "senderId": "bob",
            "messageTimestamp": yesterday_at(14)
        });

        let missing = client
            .post(format!("{base}/api/boundary/detect"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 401);

        let wrong = client
            .post(format!("{base}/api/boundary/detect"))
            .bearer_auth("not-a-token")
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status().as_u16(), 401);
        let error: Value = wrong.json().await.unwrap();
        assert!(error["error"].is_string());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn detect_rejects_malformed_requests() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let url = format!("{base}/api/boundary/detect");

        let (status, body) = post_json(
            &url,
            json!({"messageId": "m1", "senderId": "bob", "messageTimestamp": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "messageBody is required");

        let (status, body) = post_json(
            &url,
            json!({
                "messageId": "m1", "messageBody": "hi", "senderId": "bob",
                "messageTimestamp": "noon"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = post_json(
            &url,
            json!({
                "messageId": "m1", "messageBody": "hi", "senderId": "bob",
                "messageTimestamp": 0, "senderUtcOffsetMinutes": 100_000
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rule_violations_skip_the_model_and_accumulate_history() {
    timeout(TEST_TIMEOUT, async {
        let (base, stub) = start_server().await;
        let url = format!("{base}/api/boundary/detect");
        let request = |id: &str| {
            json!({
                "messageId": id, "messageBody": PUSHY, "senderId": "bob",
                "messageTimestamp": yesterday_at(23)
            })
        };

        let (status, first) = post_json(&url, request("m1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["success"], true);
        let found = types(&first);
        assert!(found.contains(&"guilt_tripping"));
        assert!(found.contains(&"after_hours_pressure"));
        assert!(!found.contains(&"repeated_pushing"));
        assert_eq!(first["violationCount"], found.len());
        assert_eq!(first["senderViolationHistory"], 0);
        assert_eq!(first["isRepeatOffender"], false);
        assert!(first["analysisId"].is_string());
        assert_eq!(stub.calls(), 0);

        let guilt = first["violations"]
            .as_array()
            .unwrap()
            .iter()
            .find(|v| v["type"] == "guilt_tripping")
            .unwrap();
        assert!(guilt["evidence"][0].as_str().unwrap().contains("really need"));
        assert!(guilt["suggestedGentle"].is_string());

        let (_, second) = post_json(&url, request("m2")).await;
        assert_eq!(second["senderViolationHistory"], 2);
        assert!(types(&second).contains(&"repeated_pushing"));
        assert_eq!(second["isRepeatOffender"], false);

        let (_, third) = post_json(&url, request("m3")).await;
        assert!(third["senderViolationHistory"].as_u64().unwrap() >= 3);
        assert_eq!(third["isRepeatOffender"], true);
        assert_eq!(stub.calls(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn model_fallback_runs_when_rules_find_nothing() {
    timeout(TEST_TIMEOUT, async {
        let (base, stub) = start_server().await;
        let url = format!("{base}/api/boundary/detect");
        stub.answer(
            StatusCode::OK,
            "```json\n{\"violations\": [{\"type\": \"scope_creep\", \"severity\": \"medium\", \
             \"explanation\": \"New deliverable added without discussion.\", \
             \"evidence\": [\"also add the export feature\"]}]}\n```",
        );

        let (status, body) = post_json(
            &url,
            json!({
                "messageId": "m1",
                "messageBody": "Could you also add the export feature to this sprint?",
                "senderId": "carol",
                "messageTimestamp": yesterday_at(14)
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stub.calls(), 1);
        assert_eq!(types(&body), vec!["scope_creep"]);
        assert!(body["violations"][0]["suggestedFirm"].is_string());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn model_failure_degrades_to_no_violations() {
    timeout(TEST_TIMEOUT, async {
        let (base, stub) = start_server().await;
        let url = format!("{base}/api/boundary/detect");
        let request = json!({
            "messageId": "m1",
            "messageBody": "Sounds good, see you at the standup tomorrow.",
            "senderId": "dave",
            "messageTimestamp": yesterday_at(14)
        });

        stub.answer(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        let (status, body) = post_json(&url, request.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["violationCount"], 0);

        stub.answer(StatusCode::OK, "I think this message is fine!");
        let (status, body) = post_json(&url, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["violations"], json!([]));
        assert_eq!(stub.calls(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn feedback_builds_sender_profile() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let patterns_url = format!("{base}/api/senders/patterns");

        let (status, empty) = post_json(&patterns_url, json!({"senderId": "erin"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(empty["success"], true);
        assert_eq!(empty["hasData"], false);
        assert_eq!(empty["context"], "");

        for i in 0..3 {
            let (_, detected) = post_json(
                &format!("{base}/api/boundary/detect"),
                json!({
                    "messageId": format!("m{i}"), "messageBody": "ok", "senderId": "erin",
                    "messageTimestamp": yesterday_at(14)
                }),
            )
            .await;
            assert_eq!(detected["triggers"][0]["pattern"], "ok");
            let analysis_id = detected["analysisId"].as_str().unwrap().to_string();

            let (status, feedback) = post_json(
                &format!("{base}/api/feedback"),
                json!({
                    "analysisId": analysis_id,
                    "messageId": format!("m{i}"),
                    "senderId": "erin",
                    "userChosenInterpretation": "busy, not upset",
                    "wasHelpful": true
                }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert!(feedback["feedbackId"].is_string());
        }

        let (status, profile) = post_json(&patterns_url, json!({"senderId": "erin"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["hasData"], true);
        assert_eq!(profile["profile"]["totalMessages"], 3);
        let context = profile["context"].as_str().unwrap();
        assert!(context.contains("(3 messages)"));
        assert!(context.contains("busy, not upset"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn feedback_requires_a_signal() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let (status, body) = post_json(
            &format!("{base}/api/feedback"),
            json!({"analysisId": "a1", "messageId": "m1", "senderId": "bob"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("wasHelpful"));
    })
    .await
    .expect("test timed out");
}
