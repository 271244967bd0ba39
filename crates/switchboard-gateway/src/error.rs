// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error-to-HTTP mapping for the operator surface.
//!
//! Validation errors return their message; internal failures are logged
//! server-side and replaced by an opaque trace id on the wire.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use switchboard_core::SwitchboardError;
use tracing::error;
use uuid::Uuid;

/// JSON error body returned by every operator endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Wrapper making [`SwitchboardError`] usable as an axum rejection.
pub struct ApiError(pub SwitchboardError);

impl From<SwitchboardError> for ApiError {
    fn from(e: SwitchboardError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let (status, body) = match &self.0 {
            SwitchboardError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: msg.clone(),
                    kind,
                    trace_id: None,
                },
            ),
            SwitchboardError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: msg.clone(),
                    kind,
                    trace_id: None,
                },
            ),
            SwitchboardError::SessionTerminal { .. } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    error: self.0.to_string(),
                    kind,
                    trace_id: None,
                },
            ),
            SwitchboardError::IngressConflict { .. } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    error: self.0.to_string(),
                    kind,
                    trace_id: None,
                },
            ),
            SwitchboardError::SandboxUnavailable { .. } => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    error: self.0.to_string(),
                    kind,
                    trace_id: None,
                },
            ),
            SwitchboardError::Timeout { .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorBody {
                    error: self.0.to_string(),
                    kind,
                    trace_id: None,
                },
            ),
            SwitchboardError::Config(_)
            | SwitchboardError::Storage { .. }
            | SwitchboardError::Internal(_) => {
                let trace_id = Uuid::new_v4().to_string();
                error!(trace_id = trace_id.as_str(), error = %self.0, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal error".to_string(),
                        kind: "internal",
                        trace_id: Some(trace_id),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
