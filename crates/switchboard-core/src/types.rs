// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain enums shared across the Switchboard workspace.
//!
//! All closed string sets are modelled as enums with `strum` Display and
//! EnumString derives; the lowercase string form is what lands in SQLite
//! and on the wire.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Completed,
    Archived,
    Failed,
}

impl SessionStatus {
    /// Terminal statuses do not prevent reads but reject new prompts.
    pub fn rejects_prompts(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Archived)
    }
}

/// Role of a participant within a session. At most one owner per session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Owner,
    Member,
}

/// Where a prompt originated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Web,
    Slack,
    Extension,
}

/// Processing status of a prompt message.
///
/// Transitions are monotonic: `pending -> processing -> {completed|failed|cancelled}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Failed | MessageStatus::Cancelled
        )
    }
}

/// Enumerated control on model inference depth.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
    Xhigh,
    Max,
}

impl ReasoningEffort {
    /// Parse an optional caller-supplied effort string.
    ///
    /// Invalid values are silently dropped (the fallback chain applies);
    /// the drop is the caller's to log.
    pub fn parse_lenient(raw: Option<&str>) -> Option<ReasoningEffort> {
        raw.and_then(|s| s.parse().ok())
    }
}

/// Declared status of the remote execution sandbox.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Pending,
    Warming,
    Syncing,
    Ready,
    Running,
    Stopped,
    Failed,
}

impl SandboxStatus {
    /// Statuses in which the controller believes the sandbox is alive and
    /// should be heartbeating.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SandboxStatus::Warming
                | SandboxStatus::Syncing
                | SandboxStatus::Ready
                | SandboxStatus::Running
        )
    }
}
