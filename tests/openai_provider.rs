use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use accessly::llm::{CompletionProvider, LlmError, OpenAiConfig, OpenAiProvider};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Seen {
    keys: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

/// `sk-limited` gets a 429, `sk-empty` an empty message, anything else a suggestion.
async fn completions(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let key = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    seen.keys.lock().unwrap().push(key.clone());
    seen.bodies.lock().unwrap().push(body);

    match key.as_str() {
        "sk-limited" => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": { "message": "Rate limit reached" } })),
        )
            .into_response(),
        "sk-empty" => Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "  " } }]
        }))
        .into_response(),
        _ => Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": " Add an alt attribute. " } }],
            "usage": { "prompt_tokens": 40, "completion_tokens": 12 }
        }))
        .into_response(),
    }
}

async fn spawn_fake() -> (SocketAddr, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(seen.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

fn provider(addr: SocketAddr, keys: &[&str]) -> OpenAiProvider {
    OpenAiProvider::new(OpenAiConfig {
        api_keys: keys.iter().map(|key| key.to_string()).collect(),
        model: "gpt-4o".into(),
        api_base: format!("http://{addr}/v1/"),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn returns_trimmed_completion() {
    let (addr, seen) = spawn_fake().await;
    let text = provider(addr, &["sk-good"])
        .complete("fix this", 250)
        .await
        .unwrap();
    assert_eq!(text, "Add an alt attribute.");

    let bodies = seen.bodies.lock().unwrap();
    assert_eq!(bodies[0]["model"], "gpt-4o");
    assert_eq!(bodies[0]["max_tokens"], 250);
    assert_eq!(bodies[0]["messages"][0]["role"], "user");
    assert_eq!(bodies[0]["messages"][0]["content"], "fix this");
}

#[tokio::test]
async fn rotates_to_next_key_on_429() {
    let (addr, seen) = spawn_fake().await;
    let text = provider(addr, &["sk-limited", "sk-good"])
        .complete("fix this", 250)
        .await
        .unwrap();
    assert_eq!(text, "Add an alt attribute.");
    assert_eq!(*seen.keys.lock().unwrap(), vec!["sk-limited", "sk-good"]);
}

#[tokio::test]
async fn exhausted_keys_report_rate_limit() {
    let (addr, _) = spawn_fake().await;
    let err = provider(addr, &["sk-limited"])
        .complete("fix this", 250)
        .await
        .unwrap_err();
    match err {
        LlmError::RateLimited(message) => {
            assert_eq!(message, "OpenAI rate limit exceeded: Rate limit reached")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn blank_content_is_an_error() {
    let (addr, _) = spawn_fake().await;
    let err = provider(addr, &["sk-empty"])
        .complete("fix this", 250)
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::EmptyContent));
}
