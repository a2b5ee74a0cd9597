// Copyright 2026 The Dictamd Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use dictamd::completion::OpenAiCompletionClient;
use dictamd::config::{self, ProcessEnv};
use dictamd::relay;

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "dictamd",
    about = "Relay that restructures dictated transcripts into Markdown"
)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = config::DEFAULT_PORT, env = "PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match config::load_config(&ProcessEnv) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        environment = %config.environment,
        model = %config.model,
        batch_size = config.batch_size,
        timeout_ms = config.timeout_ms,
        max_retries = config.max_retries,
        has_api_key = config.api_key.is_some(),
        "config loaded"
    );

    let completions = Arc::new(OpenAiCompletionClient::new(config.clone()));
    let app = relay::build_router(config.clone(), completions);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "dictamd listening");

    axum::serve(listener, app)
        .await
        .expect("server error");
}
