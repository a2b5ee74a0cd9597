// Copyright 2026 The Dictamd Project
// SPDX-License-Identifier: Apache-2.0

// Pipeline orchestrator — sequences segmentation, batching, completion
// calls, and incremental output.
//
// Responsibilities:
// - Validate the request (non-empty text, credentials configured) before
//   any upstream call is made
// - Process batches strictly in order: batch i+1 is not submitted until
//   batch i's result has been produced
// - Abort the whole request on the first final batch failure, emitting a
//   terminal error record; earlier records already emitted stand

use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::{batch_sentences, Batch};
use crate::completion::{CompletionClient, CompletionError};
use crate::config::Config;
use crate::segment::split_sentences;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One line-delimited JSON unit of incremental output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(rename = "isLast")]
    pub is_last: bool,
}

impl StreamRecord {
    pub fn partial(text: String, is_last: bool) -> Self {
        Self {
            kind: "partial".to_string(),
            text,
            is_last,
        }
    }
}

/// Terminal error record written when the pipeline aborts mid-stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub details: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
}

impl ErrorPayload {
    pub fn from_completion(err: &CompletionError) -> Self {
        Self {
            error: "failed to process transcript".to_string(),
            details: err.to_string(),
            kind: err.class().to_string(),
            error_code: err.status_code(),
        }
    }
}

/// Output of the orchestrator, consumed by the streaming response writer.
///
/// `Failed` is always the final event of its stream; no `Partial` follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Partial(StreamRecord),
    Failed(ErrorPayload),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures detected before the stream starts. These never reach the
/// completion client.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("text is required")]
    EmptyText,

    #[error("upstream API key is not configured")]
    MissingApiKey,
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Validate, segment, and batch `text`, returning a lazy event stream.
///
/// No completion call is issued until the stream is polled, and exactly one
/// call is in flight at any time. Dropping the stream early (caller
/// disconnect) stops further batch submissions.
pub fn process_transcript(
    config: &Config,
    client: Arc<dyn CompletionClient>,
    text: &str,
) -> Result<impl Stream<Item = PipelineEvent> + Send + 'static, PipelineError> {
    if text.is_empty() {
        return Err(PipelineError::EmptyText);
    }
    if config.api_key.is_none() {
        return Err(PipelineError::MissingApiKey);
    }

    let sentences = split_sentences(text);
    let batches = batch_sentences(&sentences, config.batch_size);
    let request_id = Uuid::new_v4().to_string();

    tracing::info!(
        request_id = %request_id,
        text_len = text.len(),
        sentences = sentences.len(),
        batches = batches.len(),
        "processing transcript"
    );

    Ok(run_batches(client, batches, request_id))
}

enum PipelineState {
    Processing { batches: Vec<Batch>, next: usize },
    Done,
}

fn run_batches(
    client: Arc<dyn CompletionClient>,
    batches: Vec<Batch>,
    request_id: String,
) -> impl Stream<Item = PipelineEvent> + Send + 'static {
    let initial = if batches.is_empty() {
        PipelineState::Done
    } else {
        PipelineState::Processing { batches, next: 0 }
    };

    stream::unfold(initial, move |state| {
        let client = client.clone();
        let request_id = request_id.clone();
        async move {
            match state {
                PipelineState::Processing { batches, next } => {
                    let batch = &batches[next];
                    let started = Instant::now();

                    match client.complete(&batch.text).await {
                        Ok(text) => {
                            tracing::info!(
                                request_id = %request_id,
                                batch = batch.index,
                                is_last = batch.is_last,
                                output_len = text.len(),
                                latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                                "batch completed"
                            );
                            let record = StreamRecord::partial(text, batch.is_last);
                            let next = next + 1;
                            let state = if next == batches.len() {
                                PipelineState::Done
                            } else {
                                PipelineState::Processing { batches, next }
                            };
                            Some((PipelineEvent::Partial(record), state))
                        }
                        Err(err) => {
                            tracing::error!(
                                request_id = %request_id,
                                batch = batch.index,
                                error_class = err.class(),
                                status = err.status_code(),
                                latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                                "batch failed, aborting request"
                            );
                            Some((
                                PipelineEvent::Failed(ErrorPayload::from_completion(&err)),
                                PipelineState::Done,
                            ))
                        }
                    }
                }
                PipelineState::Done => None,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
