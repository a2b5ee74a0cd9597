// Copyright 2026 The Dictamd Project
// SPDX-License-Identifier: Apache-2.0

// Process-wide configuration, read once at startup and shared read-only
// across all requests via Arc.
//
// Responsibilities:
// - Resolve upstream credentials, endpoint, timing, and batching knobs from
//   the environment with sensible defaults
// - Validate values (batch size, retry count) before the server starts
// - Never leak the API key through Debug/logging

use std::collections::HashMap;
use std::fmt;

/// All errors that can occur during config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Environment source
// ---------------------------------------------------------------------------

/// Abstraction over where configuration values come from.
///
/// `ProcessEnv` reads the real process environment; `MapEnv` provides
/// values directly (used in tests to avoid mutating global state).
pub trait Env {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment.
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Provides values from an in-memory map. Used for testing.
#[derive(Default)]
pub struct MapEnv(pub HashMap<String, String>);

impl MapEnv {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl Env for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://vip.apiyi.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-1106";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_PORT: u16 = 3001;

/// Upstream and service configuration.
///
/// Constructed once in `main` (or test setup) and passed by reference into
/// the relay and completion client. There is no module-level singleton.
#[derive(Clone)]
pub struct Config {
    /// Upstream API key. `None` is tolerated at startup so the health
    /// endpoint can report it; processing requests fail with a
    /// configuration error until it is set.
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible completions endpoint.
    pub base_url: String,
    /// Model identifier sent with every completion call.
    pub model: String,
    /// Per-completion-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum retry count for transient upstream errors.
    pub max_retries: u32,
    /// Number of sentences per batch.
    pub batch_size: usize,
    /// Deployment environment label, reported by the health endpoint.
    pub environment: String,
    /// CORS origin allow-list.
    pub allowed_origins: Vec<String>,
    /// TCP port the relay listens on.
    pub port: u16,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_deref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("batch_size", &self.batch_size)
            .field("environment", &self.environment)
            .field("allowed_origins", &self.allowed_origins)
            .field("port", &self.port)
            .finish()
    }
}

/// Load and validate configuration from an environment source.
pub fn load_config(env: &dyn Env) -> Result<Config, ConfigError> {
    let api_key = env.get("OPENAI_API_KEY").filter(|k| !k.is_empty());

    let base_url = env
        .get("DICTAMD_BASE_URL")
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let model = env
        .get("DICTAMD_MODEL")
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let timeout_ms = parse_number(env, "DICTAMD_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
    let max_retries = parse_number(env, "DICTAMD_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
    let batch_size = parse_number(env, "DICTAMD_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
    let port = parse_number(env, "PORT", DEFAULT_PORT)?;

    let environment = env
        .get("DICTAMD_ENV")
        .unwrap_or_else(|| "development".to_string());

    let allowed_origins = env
        .get("DICTAMD_ALLOWED_ORIGINS")
        .map(|raw| {
            raw.split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        })
        .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);

    if batch_size == 0 {
        return Err(ConfigError::Validation(
            "DICTAMD_BATCH_SIZE must be at least 1".to_string(),
        ));
    }
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "DICTAMD_TIMEOUT_MS must be non-zero".to_string(),
        ));
    }

    Ok(Config {
        api_key,
        base_url,
        model,
        timeout_ms,
        max_retries,
        batch_size,
        environment,
        allowed_origins,
        port,
    })
}

fn parse_number<T: std::str::FromStr>(
    env: &dyn Env,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
            reason: "expected a non-negative integer".to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
