// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event taxonomy: type constants, category mapping, persistence policy.
//!
//! Event types form an open set (the sandbox may emit types this build does
//! not know about), so they travel as strings. The category mapping here is
//! the single authoritative policy table used by both the ingress and the
//! subscriber filtering paths.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Well-known event type strings.
pub mod event_types {
    /// A prompt accepted from a subscriber.
    pub const USER_MESSAGE: &str = "user_message";
    /// Aggregated streaming model output.
    pub const TOKEN: &str = "token";
    /// A tool invocation, possibly revised across records sharing a `callId`.
    pub const TOOL_CALL: &str = "tool_call";
    /// The result of a tool invocation.
    pub const TOOL_RESULT: &str = "tool_result";
    /// Terminal signal for a message's execution.
    pub const EXECUTION_COMPLETE: &str = "execution_complete";
    /// Repository sync progress from the sandbox.
    pub const GIT_SYNC: &str = "git_sync";
    /// A produced artifact (PR, screenshot, preview, branch).
    pub const ARTIFACT: &str = "artifact";
    /// Liveness signal; never persisted.
    pub const HEARTBEAT: &str = "heartbeat";
    /// An error surfaced by the sandbox.
    pub const ERROR: &str = "error";
}

/// Coarse event category used for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Execution,
    Git,
    Artifact,
    System,
}

/// Authoritative mapping from event type to category.
pub fn event_category(event_type: &str) -> EventCategory {
    match event_type {
        event_types::TOKEN
        | event_types::TOOL_CALL
        | event_types::TOOL_RESULT
        | event_types::EXECUTION_COMPLETE => EventCategory::Execution,
        event_types::GIT_SYNC => EventCategory::Git,
        event_types::ARTIFACT => EventCategory::Artifact,
        _ => EventCategory::System,
    }
}

/// Whether an event of this type is appended to the Event Log.
///
/// False only for heartbeats, which update the sandbox record instead.
pub fn should_persist(event_type: &str) -> bool {
    event_type != event_types::HEARTBEAT
}
