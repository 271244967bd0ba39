// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session row operations.

use rusqlite::params;
use switchboard_core::SwitchboardError;

use crate::database::{map_tr_err, Database};
use crate::models::SessionRow;

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, rusqlite::Error> {
    Ok(SessionRow {
        id: row.get(0)?,
        repo_owner: row.get(1)?,
        repo_name: row.get(2)?,
        repo_id: row.get(3)?,
        status: row.get(4)?,
        current_sha: row.get(5)?,
        model: row.get(6)?,
        reasoning_effort: row.get(7)?,
        title: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const SESSION_COLUMNS: &str = "id, repo_owner, repo_name, repo_id, status, current_sha, model,
     reasoning_effort, title, created_at, updated_at";

/// Insert a session row if no row with this id exists.
///
/// Returns `true` if the row was inserted, `false` if it already existed
/// (the idempotent-init path).
pub async fn insert_session(db: &Database, session: &SessionRow) -> Result<bool, SwitchboardError> {
    let session = session.clone();
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions
                 (id, repo_owner, repo_name, repo_id, status, current_sha, model,
                  reasoning_effort, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    session.id,
                    session.repo_owner,
                    session.repo_name,
                    session.repo_id,
                    session.status,
                    session.current_sha,
                    session.model,
                    session.reasoning_effort,
                    session.title,
                    session.created_at,
                    session.updated_at,
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Get a session by id.
pub async fn get_session(db: &Database, id: &str) -> Result<Option<SessionRow>, SwitchboardError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let result = stmt.query_row(params![id], row_to_session);
            match result {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Update a session's status and bump `updated_at`.
pub async fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    now: i64,
) -> Result<(), SwitchboardError> {
    let id = id.to_string();
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record the sha of the last completed git sync.
pub async fn set_current_sha(
    db: &Database,
    id: &str,
    sha: &str,
    now: i64,
) -> Result<(), SwitchboardError> {
    let id = id.to_string();
    let sha = sha.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET current_sha = ?1, updated_at = ?2 WHERE id = ?3",
                params![sha, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// List session ids currently in the given status.
pub async fn list_ids_by_status(
    db: &Database,
    status: &str,
) -> Result<Vec<String>, SwitchboardError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM sessions WHERE status = ?1 ORDER BY created_at ASC")?;
            let rows = stmt.query_map(params![status], |row| row.get(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn make_session(id: &str) -> SessionRow {
        SessionRow {
            id: id.to_string(),
            repo_owner: "octo".to_string(),
            repo_name: "widgets".to_string(),
            repo_id: Some("R_1".to_string()),
            status: "created".to_string(),
            current_sha: None,
            model: "claude-sonnet-4-20250514".to_string(),
            reasoning_effort: None,
            title: None,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let (db, _dir) = setup_db().await;
        let session = make_session("sess-1");
        assert!(insert_session(&db, &session).await.unwrap());

        let got = get_session(&db, "sess-1").await.unwrap().unwrap();
        assert_eq!(got.repo_owner, "octo");
        assert_eq!(got.repo_name, "widgets");
        assert_eq!(got.status, "created");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let (db, _dir) = setup_db().await;
        let session = make_session("sess-dup");
        assert!(insert_session(&db, &session).await.unwrap());

        let mut again = make_session("sess-dup");
        again.repo_owner = "someone-else".to_string();
        assert!(!insert_session(&db, &again).await.unwrap());

        // First write wins.
        let got = get_session(&db, "sess-dup").await.unwrap().unwrap();
        assert_eq!(got.repo_owner, "octo");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let (db, _dir) = setup_db().await;
        assert!(get_session(&db, "nope").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn status_and_sha_updates_apply() {
        let (db, _dir) = setup_db().await;
        insert_session(&db, &make_session("s")).await.unwrap();

        update_status(&db, "s", "active", 2_000).await.unwrap();
        set_current_sha(&db, "s", "abc123", 3_000).await.unwrap();

        let got = get_session(&db, "s").await.unwrap().unwrap();
        assert_eq!(got.status, "active");
        assert_eq!(got.current_sha.as_deref(), Some("abc123"));
        assert_eq!(got.updated_at, 3_000);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_ids_filters_by_status() {
        let (db, _dir) = setup_db().await;
        insert_session(&db, &make_session("a")).await.unwrap();
        insert_session(&db, &make_session("b")).await.unwrap();
        update_status(&db, "b", "archived", 2_000).await.unwrap();

        let created = list_ids_by_status(&db, "created").await.unwrap();
        assert_eq!(created, vec!["a".to_string()]);

        db.close().await.unwrap();
    }
}
