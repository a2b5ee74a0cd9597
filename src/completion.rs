// Completion client — one outbound call per batch, with timeout and
// bounded retry.
//
// Responsibilities:
// - Build the chat-completion request (fixed system instruction, fixed
//   sampling parameters) for a batch of transcript text
// - Classify upstream failures (timeout, rate limit, auth, 5xx, malformed)
// - Retry transient failures under an explicit, unit-testable policy
// - Expose a trait seam so the orchestrator can be tested without a network

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Instruction sent with every batch. Verbatim: strict content
/// preservation, light reorganization, first-person Markdown output.
pub const SYSTEM_PROMPT: &str = "\
你是一个专业的文字编辑，负责将口述内容整理成结构清晰的文章。请严格遵循以下要求：
1. 严格保持原文的内容，不能新增、不能删减、不能扩展解释
2. 只需要对原文进行条理性的整理和分类
3. 修正明显的口误或不通顺的表达
4. 生成一个简单的标题，直接概括主要内容
5. 使用 Markdown 格式输出
6. 保持作者的第一人称视角
7. 如果原文内容很少，不要强行分段或加入过多结构";

/// Sampling parameters. Low temperature biases the model toward faithful
/// restructuring over invention.
pub const TEMPERATURE: f64 = 0.1;
pub const MAX_TOKENS: u32 = 1000;
pub const PRESENCE_PENALTY: f64 = 0.0;
pub const FREQUENCY_PENALTY: f64 = 0.3;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Final (post-retry) failure modes of a completion call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    #[error("completion call timed out: {0}")]
    Timeout(String),

    #[error("upstream rate limit hit: {message}")]
    RateLimited { message: String },

    #[error("upstream rejected credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("upstream server error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("upstream request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Stable error-class label used in the wire-level error payload and in
    /// structured logs.
    pub fn class(&self) -> &'static str {
        match self {
            CompletionError::Timeout(_) => "timeout",
            CompletionError::RateLimited { .. } => "rate_limit",
            CompletionError::Auth { .. } => "auth",
            CompletionError::Upstream { .. } => "upstream_5xx",
            CompletionError::Rejected { .. } => "invalid_request",
            CompletionError::Transport(_) => "transport",
            CompletionError::Malformed(_) => "malformed_response",
        }
    }

    /// Original HTTP status, where one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CompletionError::RateLimited { .. } => Some(429),
            CompletionError::Auth { status, .. }
            | CompletionError::Upstream { status, .. }
            | CompletionError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying could plausibly succeed. Auth failures, malformed
    /// requests, and malformed responses surface immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CompletionError::Timeout(_)
                | CompletionError::RateLimited { .. }
                | CompletionError::Upstream { .. }
                | CompletionError::Transport(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Explicit retry policy: (failed attempt count, error class) → decision.
///
/// Kept as a pure function so backoff and error-class exclusions are
/// testable without network calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(250),
        }
    }

    /// Decide after the `failed_attempts`-th consecutive failure
    /// (1-based). Non-transient errors never retry.
    pub fn decide(&self, failed_attempts: u32, error: &CompletionError) -> RetryDecision {
        if !error.is_transient() || failed_attempts > self.max_retries {
            return RetryDecision::GiveUp;
        }
        let exp = failed_attempts.saturating_sub(1).min(16);
        RetryDecision::RetryAfter(self.base_delay * 2u32.pow(exp))
    }
}

// ---------------------------------------------------------------------------
// Trait: CompletionClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over the language-model completion call.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`. `complete` returns only after retries are exhausted:
/// the orchestrator sees final success or final failure.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, input: &str) -> Result<String, CompletionError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
    presence_penalty: f64,
    frequency_penalty: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Extract the generated text from a chat-completion response body.
fn parse_completion(body: &[u8]) -> Result<String, CompletionError> {
    let response: ChatResponse = serde_json::from_slice(body)
        .map_err(|e| CompletionError::Malformed(format!("response is not valid JSON: {e}")))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CompletionError::Malformed("response has no message content".to_string()))
}

/// Map a non-success upstream status to an error class.
fn classify_status(status: u16, message: String) -> CompletionError {
    match status {
        401 | 403 => CompletionError::Auth { status, message },
        429 => CompletionError::RateLimited { message },
        500..=599 => CompletionError::Upstream { status, message },
        _ => CompletionError::Rejected { status, message },
    }
}

/// Pull a human-readable message out of an upstream error body, falling
/// back to the (truncated) raw body.
fn error_message(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
    }
    let raw = String::from_utf8_lossy(body);
    raw.chars().take(200).collect()
}

// ---------------------------------------------------------------------------
// Reqwest-backed client
// ---------------------------------------------------------------------------

/// Completion client for OpenAI-compatible chat endpoints.
pub struct OpenAiCompletionClient {
    http: reqwest::Client,
    config: Arc<Config>,
    retry: RetryPolicy,
}

impl OpenAiCompletionClient {
    pub fn new(config: Arc<Config>) -> Self {
        let retry = RetryPolicy::new(config.max_retries);
        Self {
            http: reqwest::Client::new(),
            config,
            retry,
        }
    }

    async fn send_once(&self, input: &str) -> Result<String, CompletionError> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            // Guarded against upstream of the client; kept as a hard error
            // rather than sending an unauthenticated request.
            CompletionError::Auth {
                status: 401,
                message: "no API key configured".to_string(),
            }
        })?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            presence_penalty: PRESENCE_PENALTY,
            frequency_penalty: FREQUENCY_PENALTY,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(e.to_string())
                } else {
                    CompletionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), error_message(&body)));
        }

        parse_completion(&body)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, input: &str) -> Result<String, CompletionError> {
        let mut failed_attempts = 0u32;

        loop {
            match self.send_once(input).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    failed_attempts += 1;
                    match self.retry.decide(failed_attempts, &err) {
                        RetryDecision::RetryAfter(delay) => {
                            tracing::warn!(
                                error_class = err.class(),
                                status = err.status_code(),
                                attempt = failed_attempts,
                                delay_ms = delay.as_millis() as u64,
                                "completion attempt failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            tracing::error!(
                                error_class = err.class(),
                                status = err.status_code(),
                                attempts = failed_attempts,
                                "completion failed permanently"
                            );
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
