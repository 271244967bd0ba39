// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event ingress payloads and the tool-call deduplication rule.
//!
//! The sandbox POSTs events over the operator channel. Each carries a
//! logical `type`; the remaining fields vary by type. The per-type policy
//! (what persists, what updates records, what advances the queue) lives on
//! the actor; this module owns the wire shape and the subscriber-view
//! dedup helper.

use serde::{Deserialize, Serialize};
use switchboard_storage::EventRow;

/// An event as POSTed by the sandbox to `/internal/sandbox-event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxEventPayload {
    /// Emitter-chosen stable id; synthesized when absent.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub sandbox_id: Option<String>,

    /// Emitter timestamp, epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,

    #[serde(default)]
    pub message_id: Option<String>,

    #[serde(default)]
    pub call_id: Option<String>,

    /// Declared status (heartbeat, git_sync).
    #[serde(default)]
    pub status: Option<String>,

    /// Whether the execution succeeded (execution_complete).
    #[serde(default)]
    pub success: Option<bool>,

    #[serde(default)]
    pub error: Option<String>,

    /// Token text (token events).
    #[serde(default)]
    pub content: Option<String>,

    /// Commit sha (git_sync completed).
    #[serde(default)]
    pub sha: Option<String>,

    #[serde(default)]
    pub hostname: Option<String>,

    /// Everything else, preserved verbatim into the event log.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SandboxEventPayload {
    /// The opaque JSON stored in the event log for this payload.
    pub fn to_data(&self) -> String {
        serde_json::to_value(self)
            .unwrap_or(serde_json::Value::Null)
            .to_string()
    }
}

/// What the ingress did with a posted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressOutcome {
    /// Appended to the event log (and broadcast).
    Persisted,
    /// Valid but intentionally not persisted (duplicates, late completions).
    Ignored,
    /// Token absorbed into the aggregator; it will persist on flush.
    Buffered,
    /// Heartbeat absorbed into the sandbox record.
    HeartbeatRecorded,
}

/// Latest-wins view of `tool_call` records for subscribers.
///
/// The log retains every revision of a call; a replaying subscriber should
/// only see the newest record per `call_id`. Events without a `call_id` and
/// all other types pass through untouched, in log order.
pub fn dedup_tool_calls(events: Vec<EventRow>) -> Vec<EventRow> {
    use std::collections::HashMap;

    // Index of the latest revision per call id.
    let mut latest: HashMap<String, usize> = HashMap::new();
    for (idx, event) in events.iter().enumerate() {
        if event.event_type == switchboard_core::events::event_types::TOOL_CALL {
            if let Some(call_id) = &event.call_id {
                latest.insert(call_id.clone(), idx);
            }
        }
    }

    events
        .into_iter()
        .enumerate()
        .filter(|(idx, event)| {
            if event.event_type != switchboard_core::events::event_types::TOOL_CALL {
                return true;
            }
            match &event.call_id {
                Some(call_id) => latest.get(call_id) == Some(idx),
                None => true,
            }
        })
        .map(|(_, event)| event)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, event_type: &str, call_id: Option<&str>, created_at: i64) -> EventRow {
        EventRow {
            id: id.to_string(),
            session_id: "s".to_string(),
            event_type: event_type.to_string(),
            data: "{}".to_string(),
            message_id: None,
            call_id: call_id.map(|c| c.to_string()),
            created_at,
        }
    }

    #[test]
    fn payload_deserializes_heartbeat() {
        let json = r#"{"type":"heartbeat","sandboxId":"sb-1","status":"running","timestamp":1700000000000}"#;
        let p: SandboxEventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(p.event_type, "heartbeat");
        assert_eq!(p.sandbox_id.as_deref(), Some("sb-1"));
        assert_eq!(p.status.as_deref(), Some("running"));
        assert_eq!(p.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn payload_preserves_unknown_fields() {
        let json = r#"{"type":"artifact","artifactType":"pr","url":"https://example.test/pr/1"}"#;
        let p: SandboxEventPayload = serde_json::from_str(json).unwrap();
        let data: serde_json::Value = serde_json::from_str(&p.to_data()).unwrap();
        assert_eq!(data["artifactType"], "pr");
        assert_eq!(data["url"], "https://example.test/pr/1");
    }

    #[test]
    fn dedup_keeps_latest_revision_per_call() {
        let events = vec![
            event("e1", "tool_call", Some("c1"), 100),
            event("e2", "token", None, 150),
            event("e3", "tool_call", Some("c1"), 200),
            event("e4", "tool_call", Some("c2"), 250),
        ];
        let deduped = dedup_tool_calls(events);
        let ids: Vec<_> = deduped.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn dedup_passes_through_calls_without_call_id() {
        let events = vec![
            event("e1", "tool_call", None, 100),
            event("e2", "tool_call", None, 200),
        ];
        assert_eq!(dedup_tool_calls(events).len(), 2);
    }
}
