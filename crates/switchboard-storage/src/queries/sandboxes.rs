// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandbox record operations.
//!
//! One row per session. Heartbeats land here and never in the event log.

use rusqlite::params;
use switchboard_core::SwitchboardError;

use crate::database::{map_tr_err, Database};
use crate::models::SandboxRow;

const SANDBOX_COLUMNS: &str =
    "session_id, sandbox_id, status, last_heartbeat, git_sync_status, hostname, updated_at";

fn row_to_sandbox(row: &rusqlite::Row<'_>) -> Result<SandboxRow, rusqlite::Error> {
    Ok(SandboxRow {
        session_id: row.get(0)?,
        sandbox_id: row.get(1)?,
        status: row.get(2)?,
        last_heartbeat: row.get(3)?,
        git_sync_status: row.get(4)?,
        hostname: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Get the sandbox record for a session.
pub async fn get_sandbox(
    db: &Database,
    session_id: &str,
) -> Result<Option<SandboxRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SANDBOX_COLUMNS} FROM sandboxes WHERE session_id = ?1"
            ))?;
            match stmt.query_row(params![session_id], row_to_sandbox) {
                Ok(s) => Ok(Some(s)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Insert or replace the session's sandbox record.
pub async fn upsert_sandbox(db: &Database, sandbox: &SandboxRow) -> Result<(), SwitchboardError> {
    let s = sandbox.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sandboxes
                 (session_id, sandbox_id, status, last_heartbeat, git_sync_status, hostname, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (session_id) DO UPDATE SET
                    sandbox_id = excluded.sandbox_id,
                    status = excluded.status,
                    last_heartbeat = excluded.last_heartbeat,
                    git_sync_status = excluded.git_sync_status,
                    hostname = excluded.hostname,
                    updated_at = excluded.updated_at",
                params![
                    s.session_id,
                    s.sandbox_id,
                    s.status,
                    s.last_heartbeat,
                    s.git_sync_status,
                    s.hostname,
                    s.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Update only the declared status.
pub async fn update_status(
    db: &Database,
    session_id: &str,
    status: &str,
    now: i64,
) -> Result<(), SwitchboardError> {
    let session_id = session_id.to_string();
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sandboxes SET status = ?1, updated_at = ?2 WHERE session_id = ?3",
                params![status, now, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a heartbeat: refresh `last_heartbeat` and the declared status.
pub async fn record_heartbeat(
    db: &Database,
    session_id: &str,
    sandbox_id: Option<&str>,
    status: &str,
    now: i64,
) -> Result<(), SwitchboardError> {
    let session_id = session_id.to_string();
    let sandbox_id = sandbox_id.map(|s| s.to_string());
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sandboxes (session_id, sandbox_id, status, last_heartbeat, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (session_id) DO UPDATE SET
                    sandbox_id = COALESCE(excluded.sandbox_id, sandbox_id),
                    status = excluded.status,
                    last_heartbeat = excluded.last_heartbeat,
                    updated_at = excluded.updated_at",
                params![session_id, sandbox_id, status, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Update the git sync status reported by the sandbox.
pub async fn set_git_sync_status(
    db: &Database,
    session_id: &str,
    git_sync_status: &str,
    now: i64,
) -> Result<(), SwitchboardError> {
    let session_id = session_id.to_string();
    let git_sync_status = git_sync_status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sandboxes SET git_sync_status = ?1, updated_at = ?2 WHERE session_id = ?3",
                params![git_sync_status, now, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Sandbox rows that claim to be live but have not heartbeated since `cutoff`.
///
/// Rows with no heartbeat at all fall back to `updated_at` so a sandbox that
/// never reported in is also reconciled.
pub async fn stale_live_sandboxes(
    db: &Database,
    cutoff: i64,
) -> Result<Vec<SandboxRow>, SwitchboardError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SANDBOX_COLUMNS} FROM sandboxes
                 WHERE status IN ('warming', 'syncing', 'ready', 'running')
                   AND COALESCE(last_heartbeat, updated_at) < ?1"
            ))?;
            let rows = stmt.query_map(params![cutoff], row_to_sandbox)?;
            let mut sandboxes = Vec::new();
            for row in rows {
                sandboxes.push(row?);
            }
            Ok(sandboxes)
        })
        .await
        .map_err(map_tr_err)
}
