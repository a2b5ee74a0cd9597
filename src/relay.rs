// Copyright 2026 The Dictamd Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface of the relay.
//
// Responsibilities:
// - POST /api/process-text: validate the request, run the pipeline, and
//   stream one newline-terminated JSON record per batch over a chunked
//   response
// - GET /api/health: report environment and credential presence
// - CORS allow-list + preflight from configuration
// - 404 for unknown paths

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::pipeline::{self, PipelineError, PipelineEvent};

/// Request bodies above this are rejected outright.
const MAX_BODY_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Inbound request body. Unknown fields are rejected rather than ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscriptRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub env: String,
    #[serde(rename = "hasApiKey")]
    pub has_api_key: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match self {
            PipelineError::EmptyText => StatusCode::BAD_REQUEST,
            PipelineError::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub completions: Arc<dyn CompletionClient>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        env: state.config.environment.clone(),
        has_api_key: state.config.api_key.is_some(),
    })
}

/// POST /api/process-text
///
/// On success the response is a chunked sequence of newline-terminated JSON
/// records; each record is flushed as its batch completes. A mid-stream
/// failure appends a terminal error record instead of a record with
/// `isLast:true`, then the body closes.
pub async fn process_text(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) if is_length_limit(&e) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body exceeds the 1 MiB limit",
            )
        }
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
            )
        }
    };

    let transcript: TranscriptRequest = match serde_json::from_slice(&body) {
        Ok(t) => t,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
            )
        }
    };

    let events = match pipeline::process_transcript(
        &state.config,
        state.completions.clone(),
        &transcript.text,
    ) {
        Ok(events) => events,
        Err(e) => return e.into_response(),
    };

    let lines = events.map(|event| {
        let line = match &event {
            PipelineEvent::Partial(record) => encode_line(record),
            PipelineEvent::Failed(payload) => encode_line(payload),
        };
        Ok::<Bytes, Infallible>(line)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(lines))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
}

/// True when a body read failed because the size cap was hit, as opposed
/// to a transport problem mid-read.
fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Serialize one stream record as an NDJSON line.
fn encode_line<T: Serialize>(value: &T) -> Bytes {
    let mut buf = serde_json::to_vec(value)
        .unwrap_or_else(|_| br#"{"error":"failed to encode record"}"#.to_vec());
    buf.push(b'\n');
    Bytes::from(buf)
}

async fn unknown_path() -> Response {
    error_response(StatusCode::NOT_FOUND, "unknown path")
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// CORS layer from the configured origin allow-list. Preflight (OPTIONS) is
/// answered by the layer itself.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the axum router. The completion client is injected — no side
/// effects, no hard-coded clients.
pub fn build_router(config: Arc<Config>, completions: Arc<dyn CompletionClient>) -> Router {
    let cors = cors_layer(&config);
    let state = AppState {
        config,
        completions,
    };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/process-text", post(process_text))
        .fallback(unknown_path)
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
