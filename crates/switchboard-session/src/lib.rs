// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session runtime for the Switchboard orchestrator.
//!
//! The [`SessionActor`] is the single-writer execution context for one
//! session: it owns all state mutation (prompt queue, event log, participant
//! and sandbox records) and publishes live frames to subscribers through a
//! broadcast channel. The [`SessionRegistry`] hands out one actor per
//! session id; across sessions, actors run independently.

pub mod actor;
pub mod aggregator;
pub mod auth;
pub mod frames;
pub mod ingress;
pub mod reconciler;
pub mod registry;
pub mod sandbox;
pub mod shutdown;

pub use actor::SessionActor;
pub use frames::LiveFrame;
pub use ingress::{IngressOutcome, SandboxEventPayload};
pub use registry::SessionRegistry;
pub use sandbox::{HttpSandboxClient, SandboxClient};
