// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `switchboard serve` command implementation.
//!
//! Wires the full stack: storage, session registry, heartbeat reconciler,
//! and the HTTP/WebSocket gateway. Supports graceful shutdown via signal
//! handlers; resident actors drain their token aggregators and the WAL is
//! checkpointed before exit.

use std::sync::Arc;
use std::time::Duration;

use switchboard_config::SwitchboardConfig;
use switchboard_core::SwitchboardError;
use switchboard_gateway::GatewayState;
use switchboard_session::sandbox::HttpSandboxClient;
use switchboard_session::{reconciler, shutdown, SessionRegistry};
use switchboard_storage::queries::messages;
use switchboard_storage::Database;
use tracing::info;

/// Runs the `switchboard serve` command.
pub async fn run_serve(config: SwitchboardConfig) -> Result<(), SwitchboardError> {
    init_tracing(&config.agent.log_level);

    info!("starting switchboard serve");

    let missing = config.missing_secrets();
    if !missing.is_empty() {
        eprintln!(
            "error: missing required configuration: {}. \
             Set them in switchboard.toml or via SWITCHBOARD_* environment variables.",
            missing.join(", ")
        );
        return Err(SwitchboardError::Config(format!(
            "missing required keys: {}",
            missing.join(", ")
        )));
    }

    // Open storage (runs migrations).
    let db = Database::open(&config.storage.database_path).await?;

    // Crash recovery: a message left processing by a previous process has
    // no live execution behind it; put it back at the head of the queue.
    let reset = messages::reset_stale_processing(&db).await?;
    if reset > 0 {
        info!(count = reset, "reset stale processing messages to pending");
    }

    // Sandbox runtime client.
    let api_secret = config
        .sandbox
        .api_secret
        .clone()
        .ok_or_else(|| SwitchboardError::Config("sandbox.api_secret is not set".into()))?;
    let sandbox_client = Arc::new(HttpSandboxClient::new(
        config.sandbox.base_url.clone(),
        &api_secret,
        Duration::from_secs(config.sandbox.request_timeout_secs),
    )?);

    let config = Arc::new(config);
    let registry = SessionRegistry::new(db.clone(), Arc::clone(&config), sandbox_client);

    // Install signal handler.
    let cancel = shutdown::install_signal_handler();

    // Heartbeat reconciler: scan at half the staleness threshold.
    let scan_interval = Duration::from_secs((config.sandbox.heartbeat_timeout_secs / 2).max(5));
    let reconciler_handle =
        reconciler::spawn_reconciler(Arc::clone(&registry), scan_interval, cancel.clone());
    info!(
        interval_secs = scan_interval.as_secs(),
        "heartbeat reconciler started"
    );

    // Serve until cancelled.
    let state = GatewayState::new(Arc::clone(&registry));
    switchboard_gateway::start_server(state, cancel.clone()).await?;

    // Drain and close.
    shutdown::drain_actors(&registry).await;
    let _ = reconciler_handle.await;
    db.close().await?;

    info!("switchboard serve shutdown complete");
    Ok(())
}

/// Print the effective configuration with secrets redacted.
pub fn print_config(config: &SwitchboardConfig) {
    let mut redacted = config.clone();
    redacted.gateway.operator_secret = redacted.gateway.operator_secret.map(|_| "***".into());
    redacted.auth.token_pepper = redacted.auth.token_pepper.map(|_| "***".into());
    redacted.sandbox.api_secret = redacted.sandbox.api_secret.map(|_| "***".into());
    match toml_like(&redacted) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("error: could not render config: {e}"),
    }
}

fn toml_like(config: &SwitchboardConfig) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(config)
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("switchboard={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
