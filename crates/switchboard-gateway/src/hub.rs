// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection bookkeeping for the subscriber channel.
//!
//! Fan-out itself rides each connection's broadcast receiver (see `ws`);
//! the hub tracks who is connected so presence frames fire on the first
//! join and the last leave of a participant, and so one slow connection's
//! removal never touches the others.

use dashmap::DashMap;
use switchboard_core::now_ms;

/// A live, authorized subscriber connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub participant_id: String,
    pub client_id: String,
    pub connected_at: i64,
}

/// Registry of live connections, keyed by session then connection id.
#[derive(Default)]
pub struct SubscriberHub {
    sessions: DashMap<String, DashMap<String, ConnectionInfo>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `true` when this is the participant's
    /// first live connection to the session (presence join edge).
    pub fn register(
        &self,
        session_id: &str,
        connection_id: &str,
        participant_id: &str,
        client_id: &str,
    ) -> bool {
        let conns = self
            .sessions
            .entry(session_id.to_string())
            .or_default();
        let first = !conns
            .iter()
            .any(|c| c.value().participant_id == participant_id);
        conns.insert(
            connection_id.to_string(),
            ConnectionInfo {
                participant_id: participant_id.to_string(),
                client_id: client_id.to_string(),
                connected_at: now_ms(),
            },
        );
        first
    }

    /// Drop a connection. Returns `true` when the participant has no other
    /// live connection left (presence leave edge).
    pub fn unregister(&self, session_id: &str, connection_id: &str) -> bool {
        let Some(conns) = self.sessions.get(session_id) else {
            return false;
        };
        let Some((_, removed)) = conns.remove(connection_id) else {
            return false;
        };
        let still_present = conns
            .iter()
            .any(|c| c.value().participant_id == removed.participant_id);
        !still_present
    }

    /// Live connection count for a session.
    pub fn connection_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}
