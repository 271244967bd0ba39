// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live frames published by the actor and fanned out to subscribers.
//!
//! Connection-scoped frames (`subscribed`, `replay_complete`, `pong`) are
//! built by the gateway; everything that is broadcast session-wide is here.

use serde::Serialize;
use switchboard_core::{event_category, EventCategory};
use switchboard_storage::{EventRow, ParticipantRow};

/// Participant shape exposed to subscribers. Token material never leaves
/// this struct out.
#[derive(Debug, Clone, Serialize)]
pub struct PublicParticipant {
    pub id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: i64,
    pub last_seen: Option<i64>,
    pub github_login: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&ParticipantRow> for PublicParticipant {
    fn from(row: &ParticipantRow) -> Self {
        PublicParticipant {
            id: row.id.clone(),
            user_id: row.user_id.clone(),
            role: row.role.clone(),
            joined_at: row.joined_at,
            last_seen: row.last_seen,
            github_login: row.github_login.clone(),
            display_name: row.display_name.clone(),
            avatar_url: row.avatar_url.clone(),
        }
    }
}

/// A session-wide frame delivered to every live subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveFrame {
    /// An event appended to the Event Log, tagged with its category so
    /// filtering subscribers share the ingress's mapping.
    SandboxEvent {
        event: EventRow,
        category: EventCategory,
    },
    /// The sandbox's declared status changed.
    SandboxStatus { status: String },
    /// The sandbox is being provisioned.
    SandboxWarming,
    /// The sandbox finished syncing and can take commands.
    SandboxReady,
    /// A message changed processing state.
    ProcessingStatus {
        message_id: String,
        status: String,
    },
    ParticipantJoined { participant: PublicParticipant },
    ParticipantLeft { participant_id: String },
    Typing { participant_id: String },
}

impl LiveFrame {
    /// Build a `sandbox_event` frame with its authoritative category.
    pub fn sandbox_event(event: EventRow) -> LiveFrame {
        let category = event_category(&event.event_type);
        LiveFrame::SandboxEvent { event, category }
    }
}
