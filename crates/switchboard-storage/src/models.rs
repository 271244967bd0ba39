// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for storage entities and the opaque pagination cursor.
//!
//! These mirror the SQLite schema one-to-one. Status columns are plain
//! strings at this layer; the typed enums live in `switchboard-core` and
//! are applied at the actor boundary.

use serde::{Deserialize, Serialize};

/// A session row (singleton per session id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub id: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_id: Option<String>,
    pub status: String,
    pub current_sha: Option<String>,
    pub model: String,
    pub reasoning_effort: Option<String>,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A participant row. `ws_auth_token` holds a hex digest, never a raw token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRow {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: i64,
    pub ws_auth_token: Option<String>,
    pub token_created_at: Option<i64>,
    pub last_seen: Option<i64>,
    pub github_login: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// A prompt message row. The prompt queue is the set of `pending` rows
/// ordered by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub author_participant_id: Option<String>,
    pub content: String,
    pub source: String,
    pub status: String,
    pub reasoning_effort: Option<String>,
    /// JSON array of attachment descriptors.
    pub attachments: Option<String>,
    /// JSON blob threaded back to the caller on completion.
    pub callback_context: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// An event log row. Append-only, totally ordered by `(created_at, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque JSON payload as received from the emitter.
    pub data: String,
    pub message_id: Option<String>,
    pub call_id: Option<String>,
    pub created_at: i64,
}

/// The per-session sandbox record (singleton row).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRow {
    pub session_id: String,
    pub sandbox_id: Option<String>,
    pub status: String,
    pub last_heartbeat: Option<i64>,
    pub git_sync_status: Option<String>,
    pub hostname: Option<String>,
    pub updated_at: i64,
}

/// Opaque keyset cursor pointing at a `(created_at, id)` tuple.
///
/// The encoded form is a token; callers must not parse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: i64,
    pub id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}:{}", self.created_at, self.id)
    }

    pub fn decode(raw: &str) -> Option<Cursor> {
        let (ts, id) = raw.split_once(':')?;
        let created_at = ts.parse().ok()?;
        if id.is_empty() {
            return None;
        }
        Some(Cursor {
            created_at,
            id: id.to_string(),
        })
    }
}

/// One page of an ordered, filtered read.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    /// Cursor for the next page (forward reads: after the last item;
    /// backward reads: before the first item). `None` when exhausted.
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = Cursor {
            created_at: 1_700_000_000_123,
            id: "evt-42".to_string(),
        };
        let encoded = c.encode();
        assert_eq!(Cursor::decode(&encoded), Some(c));
    }

    #[test]
    fn cursor_decode_rejects_garbage() {
        assert!(Cursor::decode("").is_none());
        assert!(Cursor::decode("no-separator").is_none());
        assert!(Cursor::decode("abc:evt-1").is_none());
        assert!(Cursor::decode("123:").is_none());
    }

    #[test]
    fn cursor_id_may_contain_separator() {
        // Only the first ':' splits; ids with ':' survive.
        let c = Cursor {
            created_at: 5,
            id: "a:b".to_string(),
        };
        assert_eq!(Cursor::decode(&c.encode()), Some(c));
    }
}
