// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The subscriber channel: replay-then-live over WebSocket.
//!
//! Handshake: the client's first frame must be
//! `{"type":"subscribe","token":...,"clientId":...}` within the auth
//! deadline. On success the connection receives `subscribed` (state snapshot
//! plus participants), a bounded ascending replay of the event-log tail,
//! `replay_complete`, then live frames.
//!
//! The live receiver is subscribed *before* the tail is read, and replayed
//! keys filter the live stream, so the delivered sequence is strictly
//! monotonic in `(created_at, id)`: no gap, no overlap.
//!
//! Close codes: 4001 authentication required, 4002 session expired. A
//! connection that stops pinging past the grace period, or falls behind its
//! queue depth, is closed without affecting other subscribers.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use switchboard_core::MessageSource;
use switchboard_session::actor::EnqueueRequest;
use switchboard_session::frames::PublicParticipant;
use switchboard_session::LiveFrame;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::server::GatewayState;

/// Close code: missing or invalid subscriber token.
pub const CLOSE_AUTH_REQUIRED: u16 = 4001;
/// Close code: the session no longer accepts this connection.
pub const CLOSE_SESSION_EXPIRED: u16 = 4002;

/// How long a fresh connection gets to present its subscribe frame.
const AUTH_DEADLINE: Duration = Duration::from_secs(10);

/// Client -> server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe {
        token: String,
        #[serde(default, rename = "clientId")]
        client_id: Option<String>,
    },
    Prompt {
        content: String,
        #[serde(default)]
        attachments: Option<serde_json::Value>,
        #[serde(default, rename = "reasoningEffort")]
        reasoning_effort: Option<String>,
    },
    Stop,
    Typing,
    Ping,
}

/// WebSocket upgrade handler for `/ws/{session_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<GatewayState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: GatewayState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // 1. Handshake: first frame must be subscribe, inside the deadline.
    let subscribe = tokio::time::timeout(AUTH_DEADLINE, await_subscribe(&mut ws_rx)).await;
    let Ok(Some((token, client_id))) = subscribe else {
        close_with(&mut ws_tx, CLOSE_AUTH_REQUIRED, "authentication required").await;
        return;
    };

    // 2. The session must exist.
    let Ok(actor) = state.registry.actor(&session_id).await else {
        close_with(&mut ws_tx, CLOSE_SESSION_EXPIRED, "session expired").await;
        return;
    };

    // 3. Token digest must match a participant.
    let participant = match actor.authorize_token(&token).await {
        Ok(Some(p)) => p,
        _ => {
            close_with(&mut ws_tx, CLOSE_AUTH_REQUIRED, "authentication required").await;
            return;
        }
    };

    // 4. Subscribe to live frames BEFORE reading the tail; replayed keys
    //    then filter the live stream (no gap, no overlap).
    let mut frames_rx = actor.subscribe_frames();

    let (snapshot, participants, tail) = match (
        actor.state().await,
        actor.list_participants().await,
        actor.replay_tail().await,
    ) {
        (Ok(s), Ok(p), Ok(t)) => (s, p, t),
        _ => {
            close_with(&mut ws_tx, CLOSE_SESSION_EXPIRED, "session expired").await;
            return;
        }
    };

    let public: Vec<PublicParticipant> = participants.iter().map(Into::into).collect();
    if send_json(
        &mut ws_tx,
        &serde_json::json!({
            "type": "subscribed",
            "state": snapshot,
            "participants": public,
        }),
    )
    .await
    .is_err()
    {
        return;
    }

    let mut watermark: Option<(i64, String)> = None;
    for event in tail {
        watermark = Some((event.created_at, event.id.clone()));
        if send_json(&mut ws_tx, &LiveFrame::sandbox_event(event))
            .await
            .is_err()
        {
            return;
        }
    }
    if send_json(&mut ws_tx, &serde_json::json!({ "type": "replay_complete" }))
        .await
        .is_err()
    {
        return;
    }

    // 5. Register for presence.
    let connection_id = Uuid::new_v4().to_string();
    let client_id = client_id.unwrap_or_else(|| connection_id.clone());
    let first = state.hub.register(&session_id, &connection_id, &participant.id, &client_id);
    if first {
        actor.publish(LiveFrame::ParticipantJoined {
            participant: (&participant).into(),
        });
    }
    debug!(
        session_id = session_id.as_str(),
        participant_id = participant.id.as_str(),
        connection_id = connection_id.as_str(),
        "subscriber connected"
    );

    // 6. Live loop: forward frames, answer pings, route client commands.
    let grace = Duration::from_secs(state.config.subscribers.ping_grace_secs);
    let mut deadline = Instant::now() + grace;

    loop {
        tokio::select! {
            frame = frames_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if let LiveFrame::SandboxEvent { event, .. } = &frame {
                            if let Some((ts, id)) = &watermark {
                                if (event.created_at, event.id.as_str()) <= (*ts, id.as_str()) {
                                    continue;
                                }
                            }
                        }
                        if send_json(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            session_id = session_id.as_str(),
                            connection_id = connection_id.as_str(),
                            skipped,
                            "subscriber too slow; closing connection"
                        );
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        deadline = Instant::now() + grace;
                        handle_client_frame(&text, &actor, &participant, &mut ws_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and protocol pings handled by the layer
                    Some(Err(e)) => {
                        debug!(error = %e, "subscriber socket error");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!(
                    connection_id = connection_id.as_str(),
                    "ping grace elapsed; closing idle subscriber"
                );
                break;
            }
        }
    }

    // 7. Cleanup; one slow or dead connection never touches the others.
    let last = state.hub.unregister(&session_id, &connection_id);
    if last {
        actor.publish(LiveFrame::ParticipantLeft {
            participant_id: participant.id.clone(),
        });
    }
    debug!(
        session_id = session_id.as_str(),
        connection_id = connection_id.as_str(),
        "subscriber disconnected"
    );
}

async fn await_subscribe(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<(String, Option<String>)> {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                return match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Subscribe { token, client_id }) => Some((token, client_id)),
                    _ => None,
                };
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn handle_client_frame(
    text: &str,
    actor: &std::sync::Arc<switchboard_session::SessionActor>,
    participant: &switchboard_storage::ParticipantRow,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "invalid subscriber frame");
            let _ = send_json(
                ws_tx,
                &serde_json::json!({ "type": "error", "error": "invalid frame" }),
            )
            .await;
            return;
        }
    };

    match frame {
        ClientFrame::Ping => {
            let _ = send_json(ws_tx, &serde_json::json!({ "type": "pong" })).await;
        }
        ClientFrame::Typing => {
            actor.publish(LiveFrame::Typing {
                participant_id: participant.id.clone(),
            });
        }
        ClientFrame::Stop => {
            if let Err(e) = actor.stop().await {
                warn!(error = %e, "subscriber stop failed");
            }
        }
        ClientFrame::Prompt {
            content,
            attachments,
            reasoning_effort,
        } => {
            let result = actor
                .enqueue_prompt(EnqueueRequest {
                    content,
                    author_id: participant.user_id.clone(),
                    source: MessageSource::Web,
                    attachments,
                    callback_context: None,
                    reasoning_effort,
                })
                .await;
            if let Err(e) = result {
                let _ = send_json(
                    ws_tx,
                    &serde_json::json!({ "type": "error", "error": e.to_string() }),
                )
                .await;
            }
        }
        ClientFrame::Subscribe { .. } => {
            // Already subscribed; ignore.
        }
    }
}

async fn send_json<T: serde::Serialize>(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    ws_tx.send(Message::Text(text.into())).await
}

async fn close_with(ws_tx: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_deserialize() {
        let f: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","token":"t","clientId":"c"}"#).unwrap();
        assert!(matches!(f, ClientFrame::Subscribe { .. }));

        let f: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(f, ClientFrame::Ping));

        let f: ClientFrame =
            serde_json::from_str(r#"{"type":"prompt","content":"hi","reasoningEffort":"low"}"#)
                .unwrap();
        match f {
            ClientFrame::Prompt {
                content,
                reasoning_effort,
                ..
            } => {
                assert_eq!(content, "hi");
                assert_eq!(reasoning_effort.as_deref(), Some("low"));
            }
            _ => panic!("expected prompt"),
        }
    }

    #[test]
    fn close_codes_are_distinct() {
        assert_ne!(CLOSE_AUTH_REQUIRED, CLOSE_SESSION_EXPIRED);
        assert_eq!(CLOSE_AUTH_REQUIRED, 4001);
        assert_eq!(CLOSE_SESSION_EXPIRED, 4002);
    }

    #[test]
    fn watermark_filter_is_strict() {
        let watermark = (100i64, "e5".to_string());
        // Same key: filtered.
        assert!((100i64, "e5") <= (watermark.0, watermark.1.as_str()));
        // Later id at same timestamp: passes.
        assert!((100i64, "e6") > (watermark.0, watermark.1.as_str()));
        // Later timestamp: passes.
        assert!((101i64, "e0") > (watermark.0, watermark.1.as_str()));
    }
}
