// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only event log operations.
//!
//! Events are totally ordered by `(created_at, id)` and never deleted.
//! Append is idempotent on the emitter-chosen id: re-ingesting the same id
//! is a no-op. Forward and backward keyset pagination guarantee no overlap
//! between consecutive pages.

use rusqlite::params;
use switchboard_core::SwitchboardError;

use crate::database::{map_tr_err, Database};
use crate::models::{Cursor, EventRow, Page};

const EVENT_COLUMNS: &str = "id, session_id, type, data, message_id, call_id, created_at";

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRow, rusqlite::Error> {
    Ok(EventRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        event_type: row.get(2)?,
        data: row.get(3)?,
        message_id: row.get(4)?,
        call_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Append an event. Returns `false` when an event with this id already
/// exists (idempotent replay); the log is never modified in that case.
pub async fn append_event(db: &Database, event: &EventRow) -> Result<bool, SwitchboardError> {
    let event = event.clone();
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO events
                 (id, session_id, type, data, message_id, call_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id,
                    event.session_id,
                    event.event_type,
                    event.data,
                    event.message_id,
                    event.call_id,
                    event.created_at,
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Whether any event with the given type and message id exists.
///
/// Used for first-wins deduplication of `execution_complete`.
pub async fn exists_for_message(
    db: &Database,
    session_id: &str,
    event_type: &str,
    message_id: &str,
) -> Result<bool, SwitchboardError> {
    let session_id = session_id.to_string();
    let event_type = event_type.to_string();
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events
                 WHERE session_id = ?1 AND type = ?2 AND message_id = ?3",
                params![session_id, event_type, message_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Forward pagination: events strictly after `cursor` in `(created_at, id)`
/// order, optionally filtered by type. Filtering happens here, not in the
/// caller.
pub async fn list_events(
    db: &Database,
    session_id: &str,
    event_type: Option<&str>,
    limit: u32,
    cursor: Option<&Cursor>,
) -> Result<Page<EventRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    let event_type = event_type.map(|t| t.to_string());
    let cursor = cursor.cloned();
    let limit = limit.clamp(1, 500) as i64;
    db.connection()
        .call(move |conn| {
            let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE session_id = ?1");
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(session_id)];
            if let Some(t) = event_type {
                sql.push_str(&format!(" AND type = ?{}", args.len() + 1));
                args.push(Box::new(t));
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
                row_to_event,
            )?;
            let mut items: Vec<EventRow> = Vec::new();
            for row in rows {
                items.push(row?);
            }

            let has_more = items.len() as i64 > limit;
            items.truncate(limit as usize);
            let cursor = if has_more {
                items.last().map(|e| {
                    Cursor {
                        created_at: e.created_at,
                        id: e.id.clone(),
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

/// Backward pagination: the page of events strictly before `before`,
/// returned in ascending order (history scrolling).
pub async fn list_events_before(
    db: &Database,
    session_id: &str,
    event_type: Option<&str>,
    limit: u32,
    before: &Cursor,
) -> Result<Page<EventRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    let event_type = event_type.map(|t| t.to_string());
    let before = before.clone();
    let limit = limit.clamp(1, 500) as i64;
    db.connection()
        .call(move |conn| {
            let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE session_id = ?1");
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(session_id)];
            if let Some(t) = event_type {
                sql.push_str(&format!(" AND type = ?{}", args.len() + 1));
                args.push(Box::new(t));
            }
            sql.push_str(&format!(
                " AND (created_at < ?{n} OR (created_at = ?{n} AND id < ?{m}))",
                n = args.len() + 1,
                m = args.len() + 2
            ));
            args.push(Box::new(before.created_at));
            args.push(Box::new(before.id));
            sql.push_str(&format!(
                " ORDER BY created_at DESC, id DESC LIMIT ?{}",
                args.len() + 1
            ));
            args.push(Box::new(limit + 1));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_event,
            )?;
            let mut items: Vec<EventRow> = Vec::new();
            for row in rows {
                items.push(row?);
            }

            let has_more = items.len() as i64 > limit;
            items.truncate(limit as usize);
            items.reverse(); // Ascending for the caller.
            let cursor = if has_more {
                items.first().map(|e| {
                    Cursor {
                        created_at: e.created_at,
                        id: e.id.clone(),
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

/// The most recent `limit` events in ascending order (the replay tail).
pub async fn tail_events(
    db: &Database,
    session_id: &str,
    limit: u32,
) -> Result<Vec<EventRow>, SwitchboardError> {
    let session_id = session_id.to_string();
    let limit = limit.max(1) as i64;
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE session_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![session_id, limit], row_to_event)?;
            let mut items: Vec<EventRow> = Vec::new();
            for row in rows {
                items.push(row?);
            }
            items.reverse();
            Ok(items)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::sessions;
    use std::collections::HashSet;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        let session = crate::models::SessionRow {
            id: "sess-1".to_string(),
            repo_owner: "octo".to_string(),
            repo_name: "widgets".to_string(),
            repo_id: None,
            status: "active".to_string(),
            current_sha: None,
            model: "claude-sonnet-4-20250514".to_string(),
            reasoning_effort: None,
            title: None,
            created_at: 1,
            updated_at: 1,
        };
        sessions::insert_session(&db, &session).await.unwrap();
        (db, dir)
    }

    fn make_event(id: &str, event_type: &str, created_at: i64) -> EventRow {
        EventRow {
            id: id.to_string(),
            session_id: "sess-1".to_string(),
            event_type: event_type.to_string(),
            data: "{}".to_string(),
            message_id: None,
            call_id: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn append_is_idempotent_on_id() {
        let (db, _dir) = setup_db().await;
        let e = make_event("e1", "error", 100);

        assert!(append_event(&db, &e).await.unwrap());
        assert!(!append_event(&db, &e).await.unwrap());

        let page = list_events(&db, "sess-1", None, 10, None).await.unwrap();
        assert_eq!(page.items.len(), 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn forward_pages_have_no_overlap_and_no_gap() {
        let (db, _dir) = setup_db().await;
        for i in 0..7 {
            append_event(&db, &make_event(&format!("e{i}"), "error", 100 + i))
                .await
                .unwrap();
        }

        let page1 = list_events(&db, "sess-1", Some("error"), 3, None)
            .await
            .unwrap();
        assert_eq!(page1.items.len(), 3);
        assert!(page1.has_more);

        let c = Cursor::decode(page1.cursor.as_deref().unwrap()).unwrap();
        let page2 = list_events(&db, "sess-1", Some("error"), 3, Some(&c))
            .await
            .unwrap();
        assert_eq!(page2.items.len(), 3);

        let ids1: HashSet<_> = page1.items.iter().map(|e| e.id.clone()).collect();
        let ids2: HashSet<_> = page2.items.iter().map(|e| e.id.clone()).collect();
        assert!(ids1.is_disjoint(&ids2));

        // Third page drains the rest.
        let c2 = Cursor::decode(page2.cursor.as_deref().unwrap()).unwrap();
        let page3 = list_events(&db, "sess-1", Some("error"), 3, Some(&c2))
            .await
            .unwrap();
        assert_eq!(page3.items.len(), 1);
        assert!(!page3.has_more);
        assert!(page3.cursor.is_none());

        let all: usize = ids1.len() + ids2.len() + page3.items.len();
        assert_eq!(all, 7);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn type_filter_happens_in_store() {
        let (db, _dir) = setup_db().await;
        append_event(&db, &make_event("e1", "token", 100)).await.unwrap();
        append_event(&db, &make_event("e2", "error", 200)).await.unwrap();
        append_event(&db, &make_event("e3", "token", 300)).await.unwrap();

        let tokens = list_events(&db, "sess-1", Some("token"), 10, None)
            .await
            .unwrap();
        assert_eq!(tokens.items.len(), 2);
        assert!(tokens.items.iter().all(|e| e.event_type == "token"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn same_timestamp_orders_by_id() {
        let (db, _dir) = setup_db().await;
        append_event(&db, &make_event("b", "token", 100)).await.unwrap();
        append_event(&db, &make_event("a", "token", 100)).await.unwrap();
        append_event(&db, &make_event("c", "token", 100)).await.unwrap();

        let page = list_events(&db, "sess-1", None, 10, None).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn backward_pagination_scrolls_history() {
        let (db, _dir) = setup_db().await;
        for i in 0..5 {
            append_event(&db, &make_event(&format!("e{i}"), "token", 100 + i))
                .await
                .unwrap();
        }

        let before = Cursor {
            created_at: 104,
            id: "e4".to_string(),
        };
        let page = list_events_before(&db, "sess-1", None, 2, &before)
            .await
            .unwrap();
        let ids: Vec<_> = page.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
        assert!(page.has_more);

        let c = Cursor::decode(page.cursor.as_deref().unwrap()).unwrap();
        let older = list_events_before(&db, "sess-1", None, 10, &c).await.unwrap();
        let ids: Vec<_> = older.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e0", "e1"]);
        assert!(!older.has_more);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn tail_returns_most_recent_ascending() {
        let (db, _dir) = setup_db().await;
        for i in 0..5 {
            append_event(&db, &make_event(&format!("e{i}"), "token", 100 + i))
                .await
                .unwrap();
        }

        let tail = tail_events(&db, "sess-1", 3).await.unwrap();
        let ids: Vec<_> = tail.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3", "e4"]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn exists_for_message_detects_completion() {
        let (db, _dir) = setup_db().await;
        let mut e = make_event("done-1", "execution_complete", 100);
        e.message_id = Some("m1".to_string());
        append_event(&db, &e).await.unwrap();

        assert!(
            exists_for_message(&db, "sess-1", "execution_complete", "m1")
                .await
                .unwrap()
        );
        assert!(
            !exists_for_message(&db, "sess-1", "execution_complete", "m2")
                .await
                .unwrap()
        );

        db.close().await.unwrap();
    }
}
