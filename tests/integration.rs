// Integration tests
//
// End-to-end tests exercising the full relay pipeline:
// request → validation → segmentation → batching → completion calls →
// streamed NDJSON response.
//
// Uses wiremock as the upstream chat-completions endpoint and
// tower::ServiceExt::oneshot for in-process HTTP; the real reqwest-backed
// completion client is used throughout (no mocks except the HTTP target).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dictamd::completion::OpenAiCompletionClient;
use dictamd::config::{load_config, Config, MapEnv};
use dictamd::pipeline::{ErrorPayload, StreamRecord};
use dictamd::relay::build_router;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Infrastructure
// ---------------------------------------------------------------------------

fn test_config(mock_url: &str, extra: &[(&str, &str)]) -> Arc<Config> {
    let mut pairs = vec![
        ("OPENAI_API_KEY", "sk-test"),
        ("DICTAMD_BASE_URL", mock_url),
        ("DICTAMD_TIMEOUT_MS", "2000"),
    ];
    pairs.extend_from_slice(extra);
    Arc::new(load_config(&MapEnv::with(&pairs)).unwrap())
}

fn build_app(config: Arc<Config>) -> axum::Router {
    let completions = Arc::new(OpenAiCompletionClient::new(config.clone()));
    build_router(config, completions)
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"role": "assistant", "content": content}
        }]
    })
}

fn process_request(text: &str) -> Request<Body> {
    let body = serde_json::json!({ "text": text });
    Request::builder()
        .method("POST")
        .uri("/api/process-text")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_lines(resp: axum::response::Response) -> Vec<String> {
    let bytes = axum::body::to_bytes(resp.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Test 1: four sentences → two upstream calls, two ordered records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn four_sentences_make_two_upstream_calls_and_two_records() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("# 标题\n\n已整理")))
        .expect(2)
        .mount(&mock_server)
        .await;

    let app = build_app(test_config(&mock_server.uri(), &[]));
    let resp = app
        .oneshot(process_request(
            "我今天很开心。我去了公园。天气很好。我看到了很多花。",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 2);

    let first: StreamRecord = serde_json::from_str(&lines[0]).unwrap();
    let second: StreamRecord = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(first.kind, "partial");
    assert!(!first.is_last);
    assert!(second.is_last);
}

// ---------------------------------------------------------------------------
// Test 2: the completion request carries the fixed prompt and sampling knobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_request_carries_prompt_and_sampling_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-3.5-turbo-1106",
            "temperature": 0.1,
            "max_tokens": 1000,
            "presence_penalty": 0.0,
            "frequency_penalty": 0.3,
            "messages": [
                {"role": "system"},
                {"role": "user", "content": "短句。"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("好的")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = build_app(test_config(&mock_server.uri(), &[]));
    let resp = app.oneshot(process_request("短句。")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 1);
}

// ---------------------------------------------------------------------------
// Test 3: transient 500 retried, then success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_500_is_retried_then_succeeds() {
    let mock_server = MockServer::start().await;

    // First call fails with a 5xx; the retry hits the fallback 200 mock.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": {"message": "internal server error", "type": "server_error"}
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("恢复后的结果")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = build_app(test_config(&mock_server.uri(), &[("DICTAMD_MAX_RETRIES", "2")]));
    let resp = app.oneshot(process_request("短句。")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 1);

    let record: StreamRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record.text, "恢复后的结果");
    assert!(record.is_last);
}

// ---------------------------------------------------------------------------
// Test 4: auth failure surfaces immediately, no retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {"message": "invalid api key", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = build_app(test_config(&mock_server.uri(), &[("DICTAMD_MAX_RETRIES", "3")]));
    let resp = app.oneshot(process_request("短句。")).await.unwrap();

    // Stream already opened; the failure arrives as the only record.
    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 1);

    let error: ErrorPayload = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(error.kind, "auth");
    assert_eq!(error.error_code, Some(401));
    assert!(error.details.contains("invalid api key"));
}

// ---------------------------------------------------------------------------
// Test 5: timeout exhausts retries and terminates the stream with an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_exhausts_retries_then_reports_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("太慢了"))
                .set_delay(std::time::Duration::from_millis(800)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let app = build_app(test_config(
        &mock_server.uri(),
        &[("DICTAMD_TIMEOUT_MS", "100"), ("DICTAMD_MAX_RETRIES", "1")],
    ));
    let resp = app.oneshot(process_request("短句。")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 1);

    let error: ErrorPayload = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(error.kind, "timeout");
    assert_eq!(error.error_code, None);
}

// ---------------------------------------------------------------------------
// Test 6: failure on batch 2 of 2 → one partial record, then an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_batch_failure_follows_first_partial_record() {
    let mock_server = MockServer::start().await;

    // Batch 1 succeeds, batch 2 hits a persistent 503 with retries disabled.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("第一批")))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": {"message": "overloaded", "type": "server_error"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = build_app(test_config(&mock_server.uri(), &[("DICTAMD_MAX_RETRIES", "0")]));
    let resp = app
        .oneshot(process_request(
            "我今天很开心。我去了公园。天气很好。我看到了很多花。",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 2);

    let first: StreamRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first.text, "第一批");
    assert!(!first.is_last);

    let error: ErrorPayload = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(error.kind, "upstream_5xx");
    assert_eq!(error.error_code, Some(503));
}

// ---------------------------------------------------------------------------
// Test 7: malformed upstream response body → malformed_response error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_upstream_response_reported_without_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": []
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = build_app(test_config(&mock_server.uri(), &[("DICTAMD_MAX_RETRIES", "3")]));
    let resp = app.oneshot(process_request("短句。")).await.unwrap();

    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 1);

    let error: ErrorPayload = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(error.kind, "malformed_response");
}

// ---------------------------------------------------------------------------
// Test 8: health endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_endpoint_reports_status() {
    let app = build_app(test_config("http://unused.test", &[]));

    let req = Request::builder()
        .method("GET")
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["hasApiKey"], true);
}
