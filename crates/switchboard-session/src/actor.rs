// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-session single-writer actor.
//!
//! Every mutating entry point serializes on one per-session async lock.
//! Inside the critical section the actor performs only bounded storage I/O
//! and *stages* outbound work; subscriber fan-out and sandbox RPC always run
//! after the lock is released. Across sessions, actors are independent.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use serde::Serialize;
use switchboard_config::SwitchboardConfig;
use switchboard_core::events::event_types;
use switchboard_core::{
    models, now_ms, should_persist, MessageSource, MessageStatus, ReasoningEffort, SandboxStatus,
    SessionStatus, SwitchboardError,
};
use switchboard_storage::queries::{events, messages, participants, sandboxes, sessions};
use switchboard_storage::{Cursor, Database, EventRow, MessageRow, Page, ParticipantRow, SandboxRow};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::{TokenAggregator, TokenBatch};
use crate::frames::LiveFrame;
use crate::ingress::{IngressOutcome, SandboxEventPayload};
use crate::sandbox::{ControllerSettings, ExecuteCommand, SandboxClient, SandboxController};
use crate::{auth, ingress};

/// A prompt enqueue request from the operator surface or a subscriber.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub content: String,
    pub author_id: String,
    pub source: MessageSource,
    pub attachments: Option<serde_json::Value>,
    pub callback_context: Option<serde_json::Value>,
    pub reasoning_effort: Option<String>,
}

/// Result of an enqueue: the stored message id and its current status.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    pub message_id: String,
    pub status: MessageStatus,
}

/// A subscriber token issuance request.
#[derive(Debug, Clone, Default)]
pub struct IssueTokenRequest {
    pub user_id: String,
    pub github_login: Option<String>,
    pub github_name: Option<String>,
}

/// Issued token: the raw value leaves the process exactly once, here.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub participant_id: String,
}

/// Read-only snapshot consumed by `GET /internal/state` and the
/// `subscribed` frame.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session: switchboard_storage::SessionRow,
    pub sandbox: Option<SandboxRow>,
    pub processing_message_id: Option<String>,
}

/// Per-session single-writer execution context.
pub struct SessionActor {
    session_id: String,
    db: Database,
    config: Arc<SwitchboardConfig>,
    controller: SandboxController,
    frames_tx: broadcast::Sender<LiveFrame>,
    aggregator: TokenAggregator,
    write_lock: Mutex<()>,
    /// Weak self-handle for background tasks spawned from `&self` methods.
    this: OnceLock<Weak<SessionActor>>,
}

impl SessionActor {
    /// Build the actor and spawn its token-batch worker.
    pub fn spawn(
        session_id: String,
        db: Database,
        config: Arc<SwitchboardConfig>,
        sandbox_client: Arc<dyn SandboxClient>,
    ) -> Arc<Self> {
        let (frames_tx, _) = broadcast::channel(config.subscribers.queue_depth.max(16));
        let (batch_tx, batch_rx) = mpsc::channel::<TokenBatch>(64);

        let aggregator = TokenAggregator::new(
            batch_tx,
            Duration::from_millis(config.stream.flush_interval_ms),
            config.stream.max_buffer_tokens,
        );

        let controller = SandboxController::new(
            session_id.clone(),
            db.clone(),
            sandbox_client,
            ControllerSettings {
                workspace: config.sandbox.workspace.clone().unwrap_or_default(),
                deployment: config.sandbox.deployment.clone().unwrap_or_default(),
                max_attempts: config.sandbox.start_max_attempts,
                stop_grace: Duration::from_secs(config.sandbox.stop_grace_secs),
            },
        );

        let actor = Arc::new(Self {
            session_id,
            db,
            config,
            controller,
            frames_tx,
            aggregator,
            write_lock: Mutex::new(()),
            this: OnceLock::new(),
        });
        let _ = actor.this.set(Arc::downgrade(&actor));

        let worker = Arc::clone(&actor);
        tokio::spawn(async move {
            worker.run_token_worker(batch_rx).await;
        });

        actor
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to the live frame stream. The hub creates one receiver per
    /// connection; a receiver that lags past the channel capacity is closed
    /// by the hub (backpressure).
    pub fn subscribe_frames(&self) -> broadcast::Receiver<LiveFrame> {
        self.frames_tx.subscribe()
    }

    /// Publish a frame to every live subscriber. Used by the actor itself
    /// and by the hub for presence frames.
    pub fn publish(&self, frame: LiveFrame) {
        // No receivers is fine; frames are fire-and-forget.
        let _ = self.frames_tx.send(frame);
    }

    fn publish_all(&self, frames: Vec<LiveFrame>) {
        for frame in frames {
            self.publish(frame);
        }
    }

    // --- operator API ---

    /// Enqueue a prompt, append its `user_message` event, and poke the
    /// dispatcher.
    pub async fn enqueue_prompt(
        &self,
        req: EnqueueRequest,
    ) -> Result<EnqueueResponse, SwitchboardError> {
        if req.content.trim().is_empty() {
            return Err(SwitchboardError::BadRequest("content is required".into()));
        }
        if req.author_id.is_empty() {
            return Err(SwitchboardError::BadRequest("authorId is required".into()));
        }

        let message_id = Uuid::new_v4().to_string();
        let mut staged = Vec::new();
        {
            let _guard = self.write_lock.lock().await;

            let session = self.require_session().await?;
            let status: SessionStatus = session
                .status
                .parse()
                .map_err(|_| SwitchboardError::Internal("corrupt session status".into()))?;
            if status.rejects_prompts() {
                return Err(SwitchboardError::SessionTerminal {
                    session_id: self.session_id.clone(),
                    status: session.status.clone(),
                });
            }

            let participant = self
                .ensure_participant(&req.author_id, "member", None, None)
                .await?;

            let effort = ReasoningEffort::parse_lenient(req.reasoning_effort.as_deref());
            if req.reasoning_effort.is_some() && effort.is_none() {
                debug!(
                    session_id = self.session_id.as_str(),
                    raw = req.reasoning_effort.as_deref().unwrap_or_default(),
                    "dropping invalid reasoning effort"
                );
            }

            let now = now_ms();
            let row = MessageRow {
                id: message_id.clone(),
                session_id: self.session_id.clone(),
                author_participant_id: Some(participant.id.clone()),
                content: req.content.clone(),
                source: req.source.to_string(),
                status: MessageStatus::Pending.to_string(),
                reasoning_effort: effort.map(|e| e.to_string()),
                attachments: req.attachments.as_ref().map(|a| a.to_string()),
                callback_context: req.callback_context.as_ref().map(|c| c.to_string()),
                error: None,
                created_at: now,
                started_at: None,
                completed_at: None,
            };
            messages::insert_message(&self.db, &row).await?;

            let event = EventRow {
                id: Uuid::new_v4().to_string(),
                session_id: self.session_id.clone(),
                event_type: event_types::USER_MESSAGE.to_string(),
                data: serde_json::json!({
                    "messageId": message_id,
                    "content": req.content,
                    "source": req.source,
                    "authorParticipantId": participant.id,
                })
                .to_string(),
                message_id: Some(message_id.clone()),
                call_id: None,
                created_at: now,
            };
            events::append_event(&self.db, &event).await?;
            staged.push(LiveFrame::sandbox_event(event));

            if status == SessionStatus::Created {
                sessions::update_status(
                    &self.db,
                    &self.session_id,
                    &SessionStatus::Active.to_string(),
                    now,
                )
                .await?;
            }
        }
        self.publish_all(staged);

        self.dispatch_next().await;

        // The dispatcher may already have picked the message up.
        let status = match messages::get_message(&self.db, &message_id).await? {
            Some(m) => m
                .status
                .parse()
                .unwrap_or(MessageStatus::Pending),
            None => MessageStatus::Pending,
        };
        Ok(EnqueueResponse { message_id, status })
    }

    /// Issue a fresh subscriber token, storing only its digest.
    pub async fn issue_ws_token(
        &self,
        req: IssueTokenRequest,
    ) -> Result<IssuedToken, SwitchboardError> {
        if req.user_id.is_empty() {
            return Err(SwitchboardError::BadRequest("userId is required".into()));
        }
        let pepper = self
            .config
            .auth
            .token_pepper
            .clone()
            .ok_or_else(|| SwitchboardError::Config("auth.token_pepper is not set".into()))?;

        let _guard = self.write_lock.lock().await;
        self.require_session().await?;

        let participant = self
            .ensure_participant(
                &req.user_id,
                "member",
                req.github_login.as_deref(),
                req.github_name.as_deref(),
            )
            .await?;

        let token = auth::generate_token()?;
        let digest = auth::hash_token(&pepper, &token);
        participants::set_token_hash(&self.db, &participant.id, &digest, now_ms()).await?;

        info!(
            session_id = self.session_id.as_str(),
            participant_id = participant.id.as_str(),
            "issued subscriber token"
        );

        Ok(IssuedToken {
            token,
            participant_id: participant.id,
        })
    }

    /// Upsert a participant row from the operator surface.
    pub async fn upsert_participant(
        &self,
        user_id: &str,
        role: &str,
        github_login: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<ParticipantRow, SwitchboardError> {
        if user_id.is_empty() {
            return Err(SwitchboardError::BadRequest("userId is required".into()));
        }
        let role: switchboard_core::ParticipantRole = role
            .parse()
            .map_err(|_| SwitchboardError::BadRequest(format!("invalid role {role}")))?;
        let _guard = self.write_lock.lock().await;
        self.require_session().await?;
        self.ensure_participant(user_id, &role.to_string(), github_login, display_name)
            .await
    }

    pub async fn list_participants(&self) -> Result<Vec<ParticipantRow>, SwitchboardError> {
        participants::list_participants(&self.db, &self.session_id).await
    }

    /// Look up the participant authorized by a raw subscriber token.
    pub async fn authorize_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<ParticipantRow>, SwitchboardError> {
        let pepper = self
            .config
            .auth
            .token_pepper
            .clone()
            .ok_or_else(|| SwitchboardError::Config("auth.token_pepper is not set".into()))?;
        let digest = auth::hash_token(&pepper, raw_token);
        let found =
            participants::get_by_token_hash(&self.db, &self.session_id, &digest).await?;
        if let Some(p) = &found {
            participants::touch_last_seen(&self.db, &p.id, now_ms()).await?;
        }
        Ok(found)
    }

    pub async fn list_messages(
        &self,
        status: Option<&str>,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<MessageRow>, SwitchboardError> {
        let cursor = decode_cursor(cursor)?;
        messages::list_messages(&self.db, &self.session_id, status, limit, cursor.as_ref()).await
    }

    pub async fn list_events(
        &self,
        event_type: Option<&str>,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<EventRow>, SwitchboardError> {
        let cursor = decode_cursor(cursor)?;
        events::list_events(&self.db, &self.session_id, event_type, limit, cursor.as_ref()).await
    }

    /// The page of events preceding `before` (history scrolling).
    pub async fn load_older_events(
        &self,
        event_type: Option<&str>,
        limit: u32,
        before: &str,
    ) -> Result<Page<EventRow>, SwitchboardError> {
        let before = Cursor::decode(before)
            .ok_or_else(|| SwitchboardError::BadRequest("invalid cursor".into()))?;
        events::list_events_before(&self.db, &self.session_id, event_type, limit, &before).await
    }

    /// The bounded replay tail, ascending, with tool calls deduplicated to
    /// their latest revision.
    pub async fn replay_tail(&self) -> Result<Vec<EventRow>, SwitchboardError> {
        let tail = events::tail_events(
            &self.db,
            &self.session_id,
            self.config.subscribers.replay_limit,
        )
        .await?;
        Ok(ingress::dedup_tool_calls(tail))
    }

    /// Read-only state snapshot.
    pub async fn state(&self) -> Result<SessionSnapshot, SwitchboardError> {
        let session = self.require_session().await?;
        let sandbox = self.controller.record().await?;
        let processing = messages::processing_message(&self.db, &self.session_id).await?;
        Ok(SessionSnapshot {
            session,
            sandbox,
            processing_message_id: processing.map(|m| m.id),
        })
    }

    /// Best-effort cancel of the current execution.
    ///
    /// Returns immediately; the processing message transitions only on the
    /// sandbox's `execution_complete` or when the stop grace period elapses.
    pub async fn stop(&self) -> Result<bool, SwitchboardError> {
        let processing = {
            let _guard = self.write_lock.lock().await;
            messages::processing_message(&self.db, &self.session_id).await?
        };
        let Some(processing) = processing else {
            return Ok(false);
        };

        if let Err(e) = self.controller.request_stop().await {
            warn!(
                session_id = self.session_id.as_str(),
                error = %e,
                "stop signal to sandbox failed"
            );
        }

        let message_id = processing.id;
        let grace = self.controller.stop_grace();
        if let Some(actor) = self.this.get().and_then(Weak::upgrade) {
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if let Err(e) = actor.finish_stop_grace(&message_id).await {
                    error!(
                        session_id = actor.session_id.as_str(),
                        error = %e,
                        "stop grace handling failed"
                    );
                }
            });
        }

        Ok(true)
    }

    /// After the stop grace period: cancel the message if the sandbox never
    /// acknowledged, and force the sandbox record to stopped.
    async fn finish_stop_grace(&self, message_id: &str) -> Result<(), SwitchboardError> {
        let mut staged = Vec::new();
        let cancelled = {
            let _guard = self.write_lock.lock().await;
            let cancelled = messages::finish_message(
                &self.db,
                message_id,
                &MessageStatus::Cancelled.to_string(),
                None,
                now_ms(),
            )
            .await?;
            if cancelled {
                self.controller
                    .set_status(SandboxStatus::Stopped, None, None)
                    .await?;
                staged.push(LiveFrame::ProcessingStatus {
                    message_id: message_id.to_string(),
                    status: MessageStatus::Cancelled.to_string(),
                });
                staged.push(LiveFrame::SandboxStatus {
                    status: SandboxStatus::Stopped.to_string(),
                });
            }
            cancelled
        };
        self.publish_all(staged);
        if cancelled {
            info!(
                session_id = self.session_id.as_str(),
                message_id, "stop grace elapsed; message cancelled"
            );
            self.dispatch_next().await;
        }
        Ok(())
    }

    /// Flip the session to archived and tear its sandbox down. Pending
    /// prompts stay queued but are not dispatched until unarchive.
    pub async fn archive(&self) -> Result<(), SwitchboardError> {
        {
            let _guard = self.write_lock.lock().await;
            self.require_session().await?;
            sessions::update_status(
                &self.db,
                &self.session_id,
                &SessionStatus::Archived.to_string(),
                now_ms(),
            )
            .await?;
        }
        // Best-effort teardown; a leftover sandbox is reconciled later.
        match self.controller.terminate().await {
            Ok(()) => self.publish(LiveFrame::SandboxStatus {
                status: SandboxStatus::Stopped.to_string(),
            }),
            Err(e) => warn!(
                session_id = self.session_id.as_str(),
                error = %e,
                "sandbox teardown on archive failed"
            ),
        }
        Ok(())
    }

    pub async fn unarchive(&self) -> Result<(), SwitchboardError> {
        {
            let _guard = self.write_lock.lock().await;
            self.require_session().await?;
            sessions::update_status(
                &self.db,
                &self.session_id,
                &SessionStatus::Active.to_string(),
                now_ms(),
            )
            .await?;
        }
        self.dispatch_next().await;
        Ok(())
    }

    // --- dispatcher ---

    /// Advance the prompt queue: while no message is processing, pick the
    /// oldest pending one and send it to the sandbox.
    ///
    /// Sandbox provisioning and command RPC happen outside the write lock;
    /// a start or dispatch failure degrades only the affected message and
    /// the loop continues with the next prompt.
    pub async fn dispatch_next(&self) {
        loop {
            let picked = match self.pick_next().await {
                Ok(picked) => picked,
                Err(e) => {
                    error!(
                        session_id = self.session_id.as_str(),
                        error = %e,
                        "dispatcher could not read the queue"
                    );
                    return;
                }
            };
            let Some((session, message)) = picked else {
                return;
            };

            self.publish(LiveFrame::ProcessingStatus {
                message_id: message.id.clone(),
                status: MessageStatus::Processing.to_string(),
            });

            match self.send_to_sandbox(&session, &message).await {
                Ok(()) => {
                    self.publish(LiveFrame::SandboxStatus {
                        status: SandboxStatus::Running.to_string(),
                    });
                    return;
                }
                Err(e) => {
                    warn!(
                        session_id = self.session_id.as_str(),
                        message_id = message.id.as_str(),
                        error = %e,
                        "dispatch failed; degrading message"
                    );
                    if let Err(fail_err) = self.fail_message(&message.id, &e).await {
                        error!(
                            session_id = self.session_id.as_str(),
                            error = %fail_err,
                            "could not mark message failed"
                        );
                        return;
                    }
                    // Continue with the next prompt.
                }
            }
        }
    }

    /// Under the lock: guard the at-most-one invariant and claim the queue
    /// head. Returns the session row alongside the claimed message.
    async fn pick_next(
        &self,
    ) -> Result<Option<(switchboard_storage::SessionRow, MessageRow)>, SwitchboardError> {
        let _guard = self.write_lock.lock().await;

        let session = self.require_session().await?;
        let status: SessionStatus = session.status.parse().unwrap_or(SessionStatus::Failed);
        if status.rejects_prompts() {
            return Ok(None);
        }
        if messages::processing_message(&self.db, &self.session_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let Some(message) = messages::oldest_pending(&self.db, &self.session_id).await? else {
            return Ok(None);
        };
        if !messages::mark_processing(&self.db, &message.id, now_ms()).await? {
            return Ok(None);
        }
        let mut message = message;
        message.status = MessageStatus::Processing.to_string();
        Ok(Some((session, message)))
    }

    /// Outside the lock: make sure a sandbox is live and hand it the command.
    async fn send_to_sandbox(
        &self,
        session: &switchboard_storage::SessionRow,
        message: &MessageRow,
    ) -> Result<(), SwitchboardError> {
        let provisioning = match self.controller.record().await? {
            Some(record) => !record
                .status
                .parse::<SandboxStatus>()
                .map(|s| s.is_live())
                .unwrap_or(false),
            None => true,
        };
        if provisioning {
            self.publish(LiveFrame::SandboxWarming);
        }

        let sandbox_id = self
            .controller
            .ensure_running(&session.repo_owner, &session.repo_name)
            .await?;

        let model = models::resolve_model(Some(&session.model));
        let effort = models::resolve_effort(
            model,
            ReasoningEffort::parse_lenient(message.reasoning_effort.as_deref()),
            ReasoningEffort::parse_lenient(session.reasoning_effort.as_deref()),
        );

        let command = ExecuteCommand {
            message_id: message.id.clone(),
            content: message.content.clone(),
            attachments: message
                .attachments
                .as_deref()
                .and_then(|a| serde_json::from_str(a).ok()),
            reasoning_effort: effort.to_string(),
            callback_context: message
                .callback_context
                .as_deref()
                .and_then(|c| serde_json::from_str(c).ok()),
        };

        self.controller.execute(&sandbox_id, &command).await
    }

    /// Mark a message failed with a synthetic `execution_complete` so
    /// subscribers learn about it through the normal stream.
    async fn fail_message(
        &self,
        message_id: &str,
        cause: &SwitchboardError,
    ) -> Result<(), SwitchboardError> {
        let mut staged = Vec::new();
        {
            let _guard = self.write_lock.lock().await;
            let now = now_ms();
            let failed = messages::finish_message(
                &self.db,
                message_id,
                &MessageStatus::Failed.to_string(),
                Some(cause.kind()),
                now,
            )
            .await?;
            if failed {
                let event = EventRow {
                    id: Uuid::new_v4().to_string(),
                    session_id: self.session_id.clone(),
                    event_type: event_types::EXECUTION_COMPLETE.to_string(),
                    data: serde_json::json!({
                        "messageId": message_id,
                        "success": false,
                        "error": cause.kind(),
                    })
                    .to_string(),
                    message_id: Some(message_id.to_string()),
                    call_id: None,
                    created_at: now,
                };
                events::append_event(&self.db, &event).await?;
                staged.push(LiveFrame::sandbox_event(event));
                staged.push(LiveFrame::ProcessingStatus {
                    message_id: message_id.to_string(),
                    status: MessageStatus::Failed.to_string(),
                });
            }
        }
        self.publish_all(staged);
        Ok(())
    }

    // --- event ingress ---

    /// Apply the per-type ingress policy to one posted event.
    ///
    /// `created_at` is assigned at ingestion so the log's `(created_at, id)`
    /// order matches append order; the emitter timestamp is preserved inside
    /// the payload. A failure here affects only this event.
    pub async fn ingest(
        &self,
        payload: SandboxEventPayload,
    ) -> Result<IngressOutcome, SwitchboardError> {
        if payload.event_type.is_empty() {
            return Err(SwitchboardError::BadRequest("type is required".into()));
        }

        // Heartbeats are the only non-persisted type: they update the
        // sandbox record and never touch the log.
        if !should_persist(&payload.event_type) {
            return self.ingest_heartbeat(&payload).await;
        }

        if payload.event_type == event_types::TOKEN {
            let message_id = payload
                .message_id
                .as_deref()
                .ok_or_else(|| {
                    SwitchboardError::BadRequest("token events require messageId".into())
                })?
                .to_string();
            let content = payload.content.clone().unwrap_or_default();
            self.aggregator.push(&message_id, &content).await;
            return Ok(IngressOutcome::Buffered);
        }

        // Any non-token execution output closes the current token batch so
        // the log keeps a faithful interleaving.
        self.aggregator.flush().await;

        match payload.event_type.as_str() {
            event_types::EXECUTION_COMPLETE => self.ingest_execution_complete(payload).await,
            event_types::GIT_SYNC => self.ingest_git_sync(payload).await,
            _ => self.ingest_append(payload).await,
        }
    }

    async fn ingest_heartbeat(
        &self,
        payload: &SandboxEventPayload,
    ) -> Result<IngressOutcome, SwitchboardError> {
        let declared = payload
            .status
            .as_deref()
            .ok_or_else(|| SwitchboardError::BadRequest("heartbeat requires status".into()))?;
        let status: SandboxStatus = declared
            .parse()
            .map_err(|_| SwitchboardError::BadRequest(format!("unknown sandbox status {declared}")))?;

        let status_str = status.to_string();
        let mut staged = Vec::new();
        {
            let _guard = self.write_lock.lock().await;
            let previous = self.controller.record().await?.map(|r| r.status);
            sandboxes::record_heartbeat(
                &self.db,
                &self.session_id,
                payload.sandbox_id.as_deref(),
                &status_str,
                now_ms(),
            )
            .await?;
            if previous.as_deref() != Some(status_str.as_str()) {
                staged.push(LiveFrame::SandboxStatus { status: status_str });
            }
        }
        self.publish_all(staged);
        Ok(IngressOutcome::HeartbeatRecorded)
    }

    async fn ingest_execution_complete(
        &self,
        payload: SandboxEventPayload,
    ) -> Result<IngressOutcome, SwitchboardError> {
        let message_id = payload
            .message_id
            .clone()
            .ok_or_else(|| {
                SwitchboardError::BadRequest("execution_complete requires messageId".into())
            })?;
        let success = payload.success.unwrap_or(false);

        let mut staged = Vec::new();
        let outcome = {
            let _guard = self.write_lock.lock().await;

            // Only the first completion per message is authoritative.
            if events::exists_for_message(
                &self.db,
                &self.session_id,
                event_types::EXECUTION_COMPLETE,
                &message_id,
            )
            .await?
            {
                debug!(
                    session_id = self.session_id.as_str(),
                    message_id = message_id.as_str(),
                    "duplicate execution_complete ignored"
                );
                IngressOutcome::Ignored
            } else {
                let now = now_ms();
                let event = EventRow {
                    id: payload.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                    session_id: self.session_id.clone(),
                    event_type: event_types::EXECUTION_COMPLETE.to_string(),
                    data: payload.to_data(),
                    message_id: Some(message_id.clone()),
                    call_id: payload.call_id.clone(),
                    created_at: now,
                };
                if !events::append_event(&self.db, &event).await? {
                    IngressOutcome::Ignored
                } else {
                    let terminal = if success {
                        MessageStatus::Completed
                    } else {
                        MessageStatus::Failed
                    };
                    let transitioned = messages::finish_message(
                        &self.db,
                        &message_id,
                        &terminal.to_string(),
                        payload.error.as_deref(),
                        now,
                    )
                    .await?;
                    if transitioned {
                        staged.push(LiveFrame::ProcessingStatus {
                            message_id: message_id.clone(),
                            status: terminal.to_string(),
                        });
                    }

                    // The sandbox is idle again.
                    if let Some(record) = self.controller.record().await? {
                        if record.status == SandboxStatus::Running.to_string() {
                            self.controller
                                .set_status(SandboxStatus::Ready, None, None)
                                .await?;
                            staged.push(LiveFrame::SandboxStatus {
                                status: SandboxStatus::Ready.to_string(),
                            });
                        }
                    }

                    staged.push(LiveFrame::sandbox_event(event));
                    IngressOutcome::Persisted
                }
            }
        };
        self.publish_all(staged);

        if outcome == IngressOutcome::Persisted {
            self.dispatch_next().await;
        }
        Ok(outcome)
    }

    async fn ingest_git_sync(
        &self,
        payload: SandboxEventPayload,
    ) -> Result<IngressOutcome, SwitchboardError> {
        let mut staged = Vec::new();
        let outcome = {
            let _guard = self.write_lock.lock().await;
            let now = now_ms();
            let event = EventRow {
                id: payload.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                session_id: self.session_id.clone(),
                event_type: event_types::GIT_SYNC.to_string(),
                data: payload.to_data(),
                message_id: payload.message_id.clone(),
                call_id: None,
                created_at: now,
            };
            if !events::append_event(&self.db, &event).await? {
                IngressOutcome::Ignored
            } else {
                if payload.status.as_deref() == Some("completed") {
                    sandboxes::set_git_sync_status(
                        &self.db,
                        &self.session_id,
                        "completed",
                        now,
                    )
                    .await?;
                    if let Some(sha) = payload.sha.as_deref() {
                        sessions::set_current_sha(&self.db, &self.session_id, sha, now).await?;
                    }
                    // Source is in place: the sandbox can take commands.
                    if let Some(record) = self.controller.record().await? {
                        let was: Option<SandboxStatus> = record.status.parse().ok();
                        if matches!(was, Some(SandboxStatus::Warming | SandboxStatus::Syncing)) {
                            self.controller
                                .set_status(SandboxStatus::Ready, None, None)
                                .await?;
                            staged.push(LiveFrame::SandboxReady);
                        }
                    }
                } else if let Some(status) = payload.status.as_deref() {
                    sandboxes::set_git_sync_status(
                        &self.db,
                        &self.session_id,
                        status,
                        now,
                    )
                    .await?;
                }
                staged.push(LiveFrame::sandbox_event(event));
                IngressOutcome::Persisted
            }
        };
        self.publish_all(staged);
        Ok(outcome)
    }

    /// Default policy: append as-is and broadcast.
    async fn ingest_append(
        &self,
        payload: SandboxEventPayload,
    ) -> Result<IngressOutcome, SwitchboardError> {
        let mut staged = Vec::new();
        let outcome = {
            let _guard = self.write_lock.lock().await;
            let event = EventRow {
                id: payload.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                session_id: self.session_id.clone(),
                event_type: payload.event_type.clone(),
                data: payload.to_data(),
                message_id: payload.message_id.clone(),
                call_id: payload.call_id.clone(),
                created_at: now_ms(),
            };
            if !events::append_event(&self.db, &event).await? {
                debug!(
                    session_id = self.session_id.as_str(),
                    event_id = event.id.as_str(),
                    "duplicate event dropped"
                );
                IngressOutcome::Ignored
            } else {
                staged.push(LiveFrame::sandbox_event(event));
                IngressOutcome::Persisted
            }
        };
        self.publish_all(staged);
        Ok(outcome)
    }

    /// The heartbeat reconciler found this session's sandbox dead: force the
    /// record to stopped and, when work is outstanding, drive it onto a
    /// fresh sandbox.
    pub async fn reconcile_dead_sandbox(&self) -> Result<(), SwitchboardError> {
        let processing = {
            let _guard = self.write_lock.lock().await;
            self.controller
                .set_status(SandboxStatus::Stopped, None, None)
                .await?;
            messages::processing_message(&self.db, &self.session_id).await?
        };
        self.publish(LiveFrame::SandboxStatus {
            status: SandboxStatus::Stopped.to_string(),
        });
        warn!(
            session_id = self.session_id.as_str(),
            "sandbox heartbeat stale; forced stopped"
        );

        if let Some(message) = processing {
            // Re-drive the in-flight message onto a new sandbox; execute is
            // idempotent by message id.
            let session = self.require_session().await?;
            if let Err(e) = self.send_to_sandbox(&session, &message).await {
                warn!(
                    session_id = self.session_id.as_str(),
                    message_id = message.id.as_str(),
                    error = %e,
                    "re-dispatch after dead sandbox failed"
                );
                self.fail_message(&message.id, &e).await?;
                self.dispatch_next().await;
            }
        } else {
            self.dispatch_next().await;
        }
        Ok(())
    }

    /// Flush and detach the token aggregator (shutdown path).
    pub async fn drain(&self) {
        self.aggregator.destroy().await;
    }

    // --- internals ---

    async fn run_token_worker(self: Arc<Self>, mut rx: mpsc::Receiver<TokenBatch>) {
        while let Some(batch) = rx.recv().await {
            if let Err(e) = self.append_token_batch(batch).await {
                error!(
                    session_id = self.session_id.as_str(),
                    error = %e,
                    "failed to persist token batch"
                );
            }
        }
    }

    /// Append one flushed token batch as a single `token` event.
    async fn append_token_batch(&self, batch: TokenBatch) -> Result<(), SwitchboardError> {
        let mut staged = Vec::new();
        {
            let _guard = self.write_lock.lock().await;
            let event = EventRow {
                id: Uuid::new_v4().to_string(),
                session_id: self.session_id.clone(),
                event_type: event_types::TOKEN.to_string(),
                data: serde_json::json!({
                    "messageId": batch.message_id,
                    "content": batch.text,
                })
                .to_string(),
                message_id: Some(batch.message_id),
                call_id: None,
                created_at: now_ms(),
            };
            events::append_event(&self.db, &event).await?;
            staged.push(LiveFrame::sandbox_event(event));
        }
        self.publish_all(staged);
        Ok(())
    }

    async fn require_session(
        &self,
    ) -> Result<switchboard_storage::SessionRow, SwitchboardError> {
        sessions::get_session(&self.db, &self.session_id)
            .await?
            .ok_or_else(|| {
                SwitchboardError::BadRequest(format!("unknown session {}", self.session_id))
            })
    }

    async fn ensure_participant(
        &self,
        user_id: &str,
        role_if_new: &str,
        github_login: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<ParticipantRow, SwitchboardError> {
        if let Some(existing) = participants::get_by_user(&self.db, &self.session_id, user_id).await?
        {
            if github_login.is_some() || display_name.is_some() {
                let mut refreshed = existing.clone();
                refreshed.github_login = github_login.map(|s| s.to_string());
                refreshed.display_name = display_name.map(|s| s.to_string());
                return participants::upsert_participant(&self.db, &refreshed).await;
            }
            return Ok(existing);
        }
        let row = ParticipantRow {
            id: Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            user_id: user_id.to_string(),
            role: role_if_new.to_string(),
            joined_at: now_ms(),
            ws_auth_token: None,
            token_created_at: None,
            last_seen: None,
            github_login: github_login.map(|s| s.to_string()),
            display_name: display_name.map(|s| s.to_string()),
            avatar_url: None,
        };
        participants::upsert_participant(&self.db, &row).await
    }
}

fn decode_cursor(raw: Option<&str>) -> Result<Option<Cursor>, SwitchboardError> {
    match raw {
        None => Ok(None),
        Some(raw) => Cursor::decode(raw)
            .map(Some)
            .ok_or_else(|| SwitchboardError::BadRequest("invalid cursor".into())),
    }
}
