// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator HTTP handlers under `/internal/*`.
//!
//! All endpoints are session-scoped: requests carry `sessionId` in the body
//! or query string and are routed to the per-session actor.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use switchboard_core::events::event_types;
use switchboard_core::{MessageSource, MessageStatus, SwitchboardError};
use switchboard_session::actor::{EnqueueRequest, IssueTokenRequest, SessionSnapshot};
use switchboard_session::registry::InitSessionRequest;
use switchboard_session::SandboxEventPayload;
use switchboard_storage::{EventRow, MessageRow};

use crate::error::ApiError;
use crate::server::GatewayState;

// --- health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /health (unauthenticated; for process supervisors).
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// --- init ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitBody {
    pub session_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    #[serde(default)]
    pub repo_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub github_login: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub session_id: String,
}

/// POST /internal/init
pub async fn post_init(
    State(state): State<GatewayState>,
    Json(body): Json<InitBody>,
) -> Result<Json<InitResponse>, ApiError> {
    let actor = state
        .registry
        .init(InitSessionRequest {
            session_name: body.session_name,
            repo_owner: body.repo_owner,
            repo_name: body.repo_name,
            repo_id: body.repo_id,
            user_id: body.user_id,
            model: body.model,
            reasoning_effort: body.reasoning_effort,
            github_login: body.github_login,
        })
        .await?;
    Ok(Json(InitResponse {
        session_id: actor.session_id().to_string(),
    }))
}

// --- prompt ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptBody {
    pub session_id: String,
    pub content: String,
    pub author_id: String,
    #[serde(default)]
    pub source: Option<MessageSource>,
    #[serde(default)]
    pub attachments: Option<serde_json::Value>,
    #[serde(default)]
    pub callback_context: Option<serde_json::Value>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub message_id: String,
    pub status: &'static str,
}

/// POST /internal/prompt
pub async fn post_prompt(
    State(state): State<GatewayState>,
    Json(body): Json<PromptBody>,
) -> Result<Json<PromptResponse>, ApiError> {
    let actor = state.registry.actor(&body.session_id).await?;
    let resp = actor
        .enqueue_prompt(EnqueueRequest {
            content: body.content,
            author_id: body.author_id,
            source: body.source.unwrap_or(MessageSource::Web),
            attachments: body.attachments,
            callback_context: body.callback_context,
            reasoning_effort: body.reasoning_effort,
        })
        .await?;
    Ok(Json(PromptResponse {
        message_id: resp.message_id,
        status: queue_status(resp.status),
    }))
}

fn queue_status(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "queued",
        MessageStatus::Processing => "processing",
        MessageStatus::Completed => "completed",
        MessageStatus::Failed => "failed",
        MessageStatus::Cancelled => "cancelled",
    }
}

// --- ws token ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsTokenBody {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub github_login: Option<String>,
    #[serde(default)]
    pub github_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsTokenResponse {
    pub token: String,
    pub participant_id: String,
}

/// POST /internal/ws-token
pub async fn post_ws_token(
    State(state): State<GatewayState>,
    Json(body): Json<WsTokenBody>,
) -> Result<Json<WsTokenResponse>, ApiError> {
    let user_id = body
        .user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| SwitchboardError::BadRequest("userId is required".into()))?;
    let actor = state.registry.actor(&body.session_id).await?;
    let issued = actor
        .issue_ws_token(IssueTokenRequest {
            user_id,
            github_login: body.github_login,
            github_name: body.github_name,
        })
        .await?;
    Ok(Json(WsTokenResponse {
        token: issued.token,
        participant_id: issued.participant_id,
    }))
}

// --- participants ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub participants: Vec<switchboard_session::frames::PublicParticipant>,
}

/// GET /internal/participants?sessionId=
pub async fn get_participants(
    State(state): State<GatewayState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<ParticipantsResponse>, ApiError> {
    let actor = state.registry.actor(&query.session_id).await?;
    let rows = actor.list_participants().await?;
    Ok(Json(ParticipantsResponse {
        participants: rows.iter().map(Into::into).collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantBody {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub github_login: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// POST /internal/participants
pub async fn post_participants(
    State(state): State<GatewayState>,
    Json(body): Json<ParticipantBody>,
) -> Result<Json<switchboard_session::frames::PublicParticipant>, ApiError> {
    let actor = state.registry.actor(&body.session_id).await?;
    let row = actor
        .upsert_participant(
            &body.user_id,
            body.role.as_deref().unwrap_or("member"),
            body.github_login.as_deref(),
            body.display_name.as_deref(),
        )
        .await?;
    Ok(Json((&row).into()))
}

// --- messages ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub session_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<MessageRow>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// GET /internal/messages
pub async fn get_messages(
    State(state): State<GatewayState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let actor = state.registry.actor(&query.session_id).await?;
    let page = actor
        .list_messages(
            query.status.as_deref(),
            query.limit.unwrap_or(50),
            query.cursor.as_deref(),
        )
        .await?;
    Ok(Json(MessagesResponse {
        messages: page.items,
        has_more: page.has_more,
        cursor: page.cursor,
    }))
}

// --- events ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub session_id: String,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub cursor: Option<String>,
    /// When present, pages backwards through history instead.
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub events: Vec<EventRow>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// GET /internal/events
pub async fn get_events(
    State(state): State<GatewayState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let actor = state.registry.actor(&query.session_id).await?;
    let limit = query.limit.unwrap_or(50);
    let page = match &query.before {
        Some(before) => {
            actor
                .load_older_events(query.event_type.as_deref(), limit, before)
                .await?
        }
        None => {
            actor
                .list_events(query.event_type.as_deref(), limit, query.cursor.as_deref())
                .await?
        }
    };
    Ok(Json(EventsResponse {
        events: page.items,
        has_more: page.has_more,
        cursor: page.cursor,
    }))
}

// --- state / lifecycle ---

/// GET /internal/state
pub async fn get_state(
    State(state): State<GatewayState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let actor = state.registry.actor(&query.session_id).await?;
    Ok(Json(actor.state().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// POST /internal/stop
pub async fn post_stop(
    State(state): State<GatewayState>,
    Json(body): Json<SessionBody>,
) -> Result<Json<AckResponse>, ApiError> {
    let actor = state.registry.actor(&body.session_id).await?;
    let stopped = actor.stop().await?;
    Ok(Json(AckResponse { ok: stopped }))
}

/// POST /internal/archive
pub async fn post_archive(
    State(state): State<GatewayState>,
    Json(body): Json<SessionBody>,
) -> Result<Json<AckResponse>, ApiError> {
    let actor = state.registry.actor(&body.session_id).await?;
    actor.archive().await?;
    Ok(Json(AckResponse { ok: true }))
}

/// POST /internal/unarchive
pub async fn post_unarchive(
    State(state): State<GatewayState>,
    Json(body): Json<SessionBody>,
) -> Result<Json<AckResponse>, ApiError> {
    let actor = state.registry.actor(&body.session_id).await?;
    actor.unarchive().await?;
    Ok(Json(AckResponse { ok: true }))
}

// --- sandbox ingress ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxEventBody {
    pub session_id: String,
    #[serde(flatten)]
    pub payload: SandboxEventPayload,
}

#[derive(Debug, Serialize)]
pub struct IngressResponse {
    pub outcome: switchboard_session::IngressOutcome,
}

/// POST /internal/sandbox-event
pub async fn post_sandbox_event(
    State(state): State<GatewayState>,
    Json(body): Json<SandboxEventBody>,
) -> Result<Json<IngressResponse>, ApiError> {
    let actor = state.registry.actor(&body.session_id).await?;
    let outcome = actor.ingest(body.payload).await?;
    Ok(Json(IngressResponse { outcome }))
}

// --- artifacts ---

/// GET /internal/artifacts?sessionId=
pub async fn get_artifacts(
    State(state): State<GatewayState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let actor = state.registry.actor(&query.session_id).await?;
    let page = actor
        .list_events(Some(event_types::ARTIFACT), 100, None)
        .await?;
    Ok(Json(EventsResponse {
        events: page.items,
        has_more: page.has_more,
        cursor: page.cursor,
    }))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

/// POST /sessions/{session_id}/artifact — multipart upload of a binary
/// artifact plus optional JSON metadata. Persists an `artifact` event as the
/// only in-session record.
pub async fn post_artifact_upload(
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let actor = state.registry.actor(&session_id).await?;

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut metadata = serde_json::Map::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        SwitchboardError::BadRequest(format!("malformed multipart body: {e}"))
    })? {
        match field.name() {
            Some("file") => {
                let name = field
                    .file_name()
                    .unwrap_or("artifact.bin")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    SwitchboardError::BadRequest(format!("unreadable file field: {e}"))
                })?;
                file = Some((name, bytes.to_vec()));
            }
            Some("metadata") => {
                let text = field.text().await.map_err(|e| {
                    SwitchboardError::BadRequest(format!("unreadable metadata field: {e}"))
                })?;
                let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    SwitchboardError::BadRequest(format!("metadata is not valid JSON: {e}"))
                })?;
                if let serde_json::Value::Object(map) = value {
                    metadata = map;
                }
            }
            _ => {}
        }
    }

    let (name, bytes) = file
        .ok_or_else(|| SwitchboardError::BadRequest("file field is required".into()))?;
    let url = state.artifacts.save(&session_id, &name, &bytes).await?;

    let mut extra = metadata;
    extra.insert("url".into(), serde_json::Value::String(url.clone()));
    let payload = SandboxEventPayload {
        id: None,
        event_type: event_types::ARTIFACT.to_string(),
        sandbox_id: None,
        timestamp: None,
        message_id: None,
        call_id: None,
        status: None,
        success: None,
        error: None,
        content: None,
        sha: None,
        hostname: None,
        extra,
    };
    actor.ingest(payload).await?;

    Ok(Json(UploadResponse { url }))
}

/// GET /artifacts/{session_id}/{name} — serve stored artifact bytes.
pub async fn get_artifact_file(
    State(state): State<GatewayState>,
    Path((session_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match state.artifacts.load(&session_id, &name).await? {
        Some(bytes) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_body_deserializes_minimal() {
        let json = r#"{"sessionId":"s1","content":"Fix the login bug","authorId":"user-1"}"#;
        let body: PromptBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.session_id, "s1");
        assert_eq!(body.content, "Fix the login bug");
        assert!(body.source.is_none());
        assert!(body.reasoning_effort.is_none());
    }

    #[test]
    fn prompt_body_accepts_source_and_effort() {
        let json = r#"{
            "sessionId":"s1","content":"x","authorId":"u",
            "source":"slack","reasoningEffort":"high"
        }"#;
        let body: PromptBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.source, Some(MessageSource::Slack));
        assert_eq!(body.reasoning_effort.as_deref(), Some("high"));
    }

    #[test]
    fn sandbox_event_body_flattens_payload() {
        let json = r#"{
            "sessionId":"s1","type":"heartbeat","sandboxId":"sb-1",
            "status":"running","timestamp":1700000000000
        }"#;
        let body: SandboxEventBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.session_id, "s1");
        assert_eq!(body.payload.event_type, "heartbeat");
        assert_eq!(body.payload.status.as_deref(), Some("running"));
    }

    #[test]
    fn queue_status_maps_pending_to_queued() {
        assert_eq!(queue_status(MessageStatus::Pending), "queued");
        assert_eq!(queue_status(MessageStatus::Processing), "processing");
    }

    #[test]
    fn events_query_accepts_type_param() {
        let query: EventsQuery =
            serde_urlencoded::from_str("sessionId=s1&type=error&limit=3").unwrap();
        assert_eq!(query.event_type.as_deref(), Some("error"));
        assert_eq!(query.limit, Some(3));
    }
}
