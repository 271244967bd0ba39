// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Participant row operations.
//!
//! Tokens are stored only as hex digests (`ws_auth_token`); lookup by digest
//! is how the subscriber hub authorizes a live connection.

use rusqlite::params;
use switchboard_core::SwitchboardError;

use crate::database::{map_tr_err, Database};
use crate::models::ParticipantRow;

const PARTICIPANT_COLUMNS: &str = "id, session_id, user_id, role, joined_at, ws_auth_token,
     token_created_at, last_seen, github_login, display_name, avatar_url";

fn row_to_participant(row: &rusqlite::Row<'_>) -> Result<ParticipantRow, rusqlite::Error> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        joined_at: row.get(4)?,
        ws_auth_token: row.get(5)?,
        token_created_at: row.get(6)?,
        last_seen: row.get(7)?,
        github_login: row.get(8)?,
        display_name: row.get(9)?,
        avatar_url: row.get(10)?,
    })
}

/// Insert a participant, or refresh GitHub metadata on the existing row for
/// the same `(session_id, user_id)`. Returns the stored row either way.
pub async fn upsert_participant(
    db: &Database,
    participant: &ParticipantRow,
) -> Result<ParticipantRow, SwitchboardError> {
    let p = participant.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO participants
                 (id, session_id, user_id, role, joined_at, ws_auth_token, token_created_at,
                  last_seen, github_login, display_name, avatar_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (session_id, user_id) DO UPDATE SET
                    github_login = COALESCE(excluded.github_login, github_login),
                    display_name = COALESCE(excluded.display_name, display_name),
                    avatar_url = COALESCE(excluded.avatar_url, avatar_url)",
                params![
                    p.id,
                    p.session_id,
                    p.user_id,
                    p.role,
                    p.joined_at,
                    p.ws_auth_token,
                    p.token_created_at,
                    p.last_seen,
                    p.github_login,
                    p.display_name,
                    p.avatar_url,
                ],
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE session_id = ?1 AND user_id = ?2"
            ))?;
            Ok(stmt.query_row(params![p.session_id, p.user_id], row_to_participant)?)
        })
        .await
        .map_err(map_tr_err)
}

/// Get a participant by session and user.
pub async fn get_by_user(
    db: &Database,
    session_id: &str,
    user_id: &str,
) -> Result<Option<ParticipantRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE session_id = ?1 AND user_id = ?2"
            ))?;
            match stmt.query_row(params![session_id, user_id], row_to_participant) {
                Ok(p) => Ok(Some(p)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Look up a participant by the digest of a presented subscriber token.
pub async fn get_by_token_hash(
    db: &Database,
    session_id: &str,
    token_hash: &str,
) -> Result<Option<ParticipantRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    let token_hash = token_hash.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE session_id = ?1 AND ws_auth_token = ?2"
            ))?;
            match stmt.query_row(params![session_id, token_hash], row_to_participant) {
                Ok(p) => Ok(Some(p)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Store a fresh token digest on a participant row.
pub async fn set_token_hash(
    db: &Database,
    participant_id: &str,
    token_hash: &str,
    now: i64,
) -> Result<(), SwitchboardError> {
    let participant_id = participant_id.to_string();
    let token_hash = token_hash.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE participants SET ws_auth_token = ?1, token_created_at = ?2 WHERE id = ?3",
                params![token_hash, now, participant_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Update a participant's presence timestamp.
pub async fn touch_last_seen(
    db: &Database,
    participant_id: &str,
    now: i64,
) -> Result<(), SwitchboardError> {
    let participant_id = participant_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE participants SET last_seen = ?1 WHERE id = ?2",
                params![now, participant_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// List all participants of a session in join order.
pub async fn list_participants(
    db: &Database,
    session_id: &str,
) -> Result<Vec<ParticipantRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE session_id = ?1 ORDER BY joined_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![session_id], row_to_participant)?;
            let mut participants = Vec::new();
            for row in rows {
                participants.push(row?);
            }
            Ok(participants)
        })
        .await
        .map_err(map_tr_err)
}
