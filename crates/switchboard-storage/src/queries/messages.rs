// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message (prompt queue) operations.
//!
//! The prompt queue is implicit in this table: the dispatcher selects the
//! oldest `pending` row and flips it to `processing`. A partial unique index
//! guarantees at most one `processing` message per session; the status flips
//! here are guarded so completion and cancellation are idempotent.

use rusqlite::params;
use switchboard_core::SwitchboardError;

use crate::database::{map_tr_err, Database};
use crate::models::{Cursor, MessageRow, Page};

const MESSAGE_COLUMNS: &str = "id, session_id, author_participant_id, content, source, status,
     reasoning_effort, attachments, callback_context, error, created_at, started_at, completed_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        author_participant_id: row.get(2)?,
        content: row.get(3)?,
        source: row.get(4)?,
        status: row.get(5)?,
        reasoning_effort: row.get(6)?,
        attachments: row.get(7)?,
        callback_context: row.get(8)?,
        error: row.get(9)?,
        created_at: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

/// Insert a new prompt message (enqueue).
pub async fn insert_message(db: &Database, msg: &MessageRow) -> Result<(), SwitchboardError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO messages
                 (id, session_id, author_participant_id, content, source, status,
                  reasoning_effort, attachments, callback_context, error, created_at,
                  started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    msg.id,
                    msg.session_id,
                    msg.author_participant_id,
                    msg.content,
                    msg.source,
                    msg.status,
                    msg.reasoning_effort,
                    msg.attachments,
                    msg.callback_context,
                    msg.error,
                    msg.created_at,
                    msg.started_at,
                    msg.completed_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a message by id.
pub async fn get_message(db: &Database, id: &str) -> Result<Option<MessageRow>, SwitchboardError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
            ))?;
            match stmt.query_row(params![id], row_to_message) {
                Ok(m) => Ok(Some(m)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// The oldest pending message of a session, if any (the queue head).
pub async fn oldest_pending(
    db: &Database,
    session_id: &str,
) -> Result<Option<MessageRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND status = 'pending'
                 ORDER BY created_at ASC, id ASC LIMIT 1"
            ))?;
            match stmt.query_row(params![session_id], row_to_message) {
                Ok(m) => Ok(Some(m)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// The message currently in `processing` for a session, if any.
pub async fn processing_message(
    db: &Database,
    session_id: &str,
) -> Result<Option<MessageRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND status = 'processing' LIMIT 1"
            ))?;
            match stmt.query_row(params![session_id], row_to_message) {
                Ok(m) => Ok(Some(m)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Flip a pending message to `processing` and stamp `started_at`.
///
/// Returns `false` when the message is no longer pending (lost race, already
/// dispatched, or cancelled), in which case nothing changed.
pub async fn mark_processing(
    db: &Database,
    id: &str,
    started_at: i64,
) -> Result<bool, SwitchboardError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'processing', started_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![started_at, id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Drive a processing message to a terminal status.
///
/// Guarded on `status = 'processing'`, so a second completion for the same
/// message is a no-op; returns whether the transition applied.
pub async fn finish_message(
    db: &Database,
    id: &str,
    status: &str,
    error: Option<&str>,
    completed_at: i64,
) -> Result<bool, SwitchboardError> {
    let id = id.to_string();
    let status = status.to_string();
    let error = error.map(|e| e.to_string());
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = ?1, error = ?2, completed_at = ?3
                 WHERE id = ?4 AND status = 'processing'",
                params![status, error, completed_at, id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Reset any `processing` messages back to `pending`.
///
/// Crash recovery: on startup, a message left mid-flight by a previous
/// process has no live execution behind it.
pub async fn reset_stale_processing(db: &Database) -> Result<usize, SwitchboardError> {
    db.connection()
        .call(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'pending', started_at = NULL
                 WHERE status = 'processing'",
                [],
            )?;
            Ok(changed)
        })
        .await
        .map_err(map_tr_err)
}

/// Paginated forward read over a session's messages, optionally filtered by
/// status, keyset-ordered by `(created_at, id)`.
pub async fn list_messages(
    db: &Database,
    session_id: &str,
    status: Option<&str>,
    limit: u32,
    cursor: Option<&Cursor>,
) -> Result<Page<MessageRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    let status = status.map(|s| s.to_string());
    let cursor = cursor.cloned();
    let limit = limit.clamp(1, 500) as i64;
    db.connection()
        .call(move |conn| {
            let mut sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1"
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(session_id)];
            if let Some(status) = status {
                sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
                args.push(Box::new(status));
            }
            if let Some(c) = cursor {
                sql.push_str(&format!(
                    " AND (created_at > ?{n} OR (created_at = ?{n} AND id > ?{m}))",
                    n = args.len() + 1,
                    m = args.len() + 2
                ));
                args.push(Box::new(c.created_at));
                args.push(Box::new(c.id));
            }
            sql.push_str(&format!(
                " ORDER BY created_at ASC, id ASC LIMIT ?{}",
                args.len() + 1
            ));
            args.push(Box::new(limit + 1));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_message,
            )?;
            let mut items: Vec<MessageRow> = Vec::new();
            for row in rows {
                items.push(row?);
            }

            let has_more = items.len() as i64 > limit;
            items.truncate(limit as usize);
            let cursor = if has_more {
                items.last().map(|m| {
                    Cursor {
                        created_at: m.created_at,
                        id: m.id.clone(),
                    }
                    .encode()
                })
            } else {
                None
            };
            Ok(Page {
                items,
                has_more,
                cursor,
            })
        })
        .await
        .map_err(map_tr_err)
}
