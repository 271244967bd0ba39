// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway for the Switchboard orchestrator.
//!
//! Serves two surfaces: the operator channel under `/internal/*`
//! (shared-secret authenticated, consumed by the user-facing gateway and the
//! sandbox) and the subscriber channel at `/ws/{session_id}` (token
//! authenticated, replay-then-live).

pub mod artifact;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod server;
pub mod ws;

pub use artifact::ArtifactStore;
pub use hub::SubscriberHub;
pub use server::{start_server, GatewayState};
