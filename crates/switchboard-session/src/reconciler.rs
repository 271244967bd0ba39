// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heartbeat-freshness reconciliation.
//!
//! The controller's declared sandbox state can drift from reality: a sandbox
//! that died without reporting keeps claiming liveness forever. The
//! reconciler periodically scans for live-claiming records whose last
//! heartbeat is older than the configured threshold, forces them to
//! `stopped`, and re-drives outstanding work onto a fresh sandbox.

use std::sync::Arc;
use std::time::Duration;

use switchboard_core::now_ms;
use switchboard_storage::queries::sandboxes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::SessionRegistry;

/// Spawn the background reconciler task.
///
/// Runs until the cancellation token fires. Scan failures are logged and do
/// not stop the loop.
pub fn spawn_reconciler(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = reconcile_once(&registry).await {
                        error!(error = %e, "heartbeat reconciliation pass failed");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    })
}

/// One reconciliation pass over every session's sandbox record.
pub async fn reconcile_once(
    registry: &Arc<SessionRegistry>,
) -> Result<(), switchboard_core::SwitchboardError> {
    let timeout_ms = registry.config().sandbox.heartbeat_timeout_secs as i64 * 1_000;
    let cutoff = now_ms() - timeout_ms;

    let stale = sandboxes::stale_live_sandboxes(registry.database(), cutoff).await?;
    if stale.is_empty() {
        debug!("reconciler: all sandboxes fresh");
        return Ok(());
    }

    for record in stale {
        match registry.actor(&record.session_id).await {
            Ok(actor) => {
                if let Err(e) = actor.reconcile_dead_sandbox().await {
                    error!(
                        session_id = record.session_id.as_str(),
                        error = %e,
                        "failed to reconcile dead sandbox"
                    );
                }
            }
            Err(e) => {
                error!(
                    session_id = record.session_id.as_str(),
                    error = %e,
                    "reconciler could not resolve session actor"
                );
            }
        }
    }
    Ok(())
}
