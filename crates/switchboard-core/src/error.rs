// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Switchboard session orchestrator.

use thiserror::Error;

/// The primary error type used across all Switchboard crates.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    /// Malformed payload, missing required field, invalid enum value.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid operator secret or subscriber token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Mutation attempted on a session in a terminal status.
    #[error("session {session_id} is {status}")]
    SessionTerminal { session_id: String, status: String },

    /// The sandbox controller exhausted retries starting or contacting the sandbox.
    #[error("sandbox unavailable: {message}")]
    SandboxUnavailable {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Duplicate event received on the ingress path.
    #[error("duplicate event: {event_id}")]
    IngressConflict { event_id: String },

    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors. The message is logged server-side and
    /// replaced by an opaque trace id at the HTTP boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SwitchboardError {
    /// Short machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            SwitchboardError::BadRequest(_) => "bad_request",
            SwitchboardError::Unauthorized(_) => "unauthorized",
            SwitchboardError::SessionTerminal { .. } => "session_terminal",
            SwitchboardError::SandboxUnavailable { .. } => "sandbox_unavailable",
            SwitchboardError::IngressConflict { .. } => "ingress_conflict",
            SwitchboardError::Config(_) => "config",
            SwitchboardError::Storage { .. } => "storage",
            SwitchboardError::Timeout { .. } => "timeout",
            SwitchboardError::Internal(_) => "internal",
        }
    }
}
