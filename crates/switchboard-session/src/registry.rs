// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One actor per session id.
//!
//! The registry is the front door for the gateway: `init` creates session
//! state idempotently; `actor` resolves an existing session to its
//! single-writer actor, creating the in-memory instance on first touch.

use std::sync::Arc;

use dashmap::DashMap;
use switchboard_config::SwitchboardConfig;
use switchboard_core::types::ParticipantRole;
use switchboard_core::{models, now_ms, ReasoningEffort, SandboxStatus, SessionStatus, SwitchboardError};
use switchboard_storage::queries::{participants, sandboxes, sessions};
use switchboard_storage::{Database, ParticipantRow, SandboxRow, SessionRow};
use tracing::{debug, info};
use uuid::Uuid;

use crate::actor::SessionActor;
use crate::sandbox::SandboxClient;

/// Session creation request from the operator surface.
#[derive(Debug, Clone)]
pub struct InitSessionRequest {
    /// Caller-chosen session name; doubles as the session id.
    pub session_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_id: Option<String>,
    pub user_id: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub github_login: Option<String>,
}

/// Holds every live [`SessionActor`] and creates them on demand.
pub struct SessionRegistry {
    db: Database,
    config: Arc<SwitchboardConfig>,
    sandbox_client: Arc<dyn SandboxClient>,
    actors: DashMap<String, Arc<SessionActor>>,
}

impl SessionRegistry {
    pub fn new(
        db: Database,
        config: Arc<SwitchboardConfig>,
        sandbox_client: Arc<dyn SandboxClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            config,
            sandbox_client,
            actors: DashMap::new(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Arc<SwitchboardConfig> {
        &self.config
    }

    /// Create (or ensure) a session. Idempotent: re-invocation with the same
    /// session name is a no-op that returns the existing actor.
    pub async fn init(
        &self,
        req: InitSessionRequest,
    ) -> Result<Arc<SessionActor>, SwitchboardError> {
        if req.session_name.is_empty() {
            return Err(SwitchboardError::BadRequest("sessionName is required".into()));
        }
        if req.user_id.is_empty() {
            return Err(SwitchboardError::BadRequest("userId is required".into()));
        }
        if req.repo_owner.is_empty() || req.repo_name.is_empty() {
            return Err(SwitchboardError::BadRequest(
                "repoOwner and repoName are required".into(),
            ));
        }

        let model = models::resolve_model(req.model.as_deref());
        let effort = ReasoningEffort::parse_lenient(req.reasoning_effort.as_deref());
        if req.reasoning_effort.is_some() && effort.is_none() {
            debug!(
                session = req.session_name.as_str(),
                raw = req.reasoning_effort.as_deref().unwrap_or_default(),
                "dropping invalid reasoning effort at init"
            );
        }

        let now = now_ms();
        let row = SessionRow {
            id: req.session_name.clone(),
            repo_owner: req.repo_owner.clone(),
            repo_name: req.repo_name.clone(),
            repo_id: req.repo_id.clone(),
            status: SessionStatus::Created.to_string(),
            current_sha: None,
            model: model.id.to_string(),
            reasoning_effort: effort.map(|e| e.to_string()),
            title: None,
            created_at: now,
            updated_at: now,
        };

        let created = sessions::insert_session(&self.db, &row).await?;
        if created {
            // First participant is the owner; later joiners are members.
            participants::upsert_participant(
                &self.db,
                &ParticipantRow {
                    id: Uuid::new_v4().to_string(),
                    session_id: req.session_name.clone(),
                    user_id: req.user_id.clone(),
                    role: ParticipantRole::Owner.to_string(),
                    joined_at: now,
                    ws_auth_token: None,
                    token_created_at: None,
                    last_seen: None,
                    github_login: req.github_login.clone(),
                    display_name: None,
                    avatar_url: None,
                },
            )
            .await?;
            sandboxes::upsert_sandbox(
                &self.db,
                &SandboxRow {
                    session_id: req.session_name.clone(),
                    sandbox_id: None,
                    status: SandboxStatus::Pending.to_string(),
                    last_heartbeat: None,
                    git_sync_status: None,
                    hostname: None,
                    updated_at: now,
                },
            )
            .await?;
            info!(
                session_id = req.session_name.as_str(),
                repo = format!("{}/{}", req.repo_owner, req.repo_name).as_str(),
                model = model.id,
                "session created"
            );
        } else {
            debug!(
                session_id = req.session_name.as_str(),
                "init for existing session is a no-op"
            );
        }

        self.actor(&req.session_name).await
    }

    /// Resolve the actor for an existing session.
    pub async fn actor(&self, session_id: &str) -> Result<Arc<SessionActor>, SwitchboardError> {
        if let Some(actor) = self.actors.get(session_id) {
            return Ok(Arc::clone(actor.value()));
        }

        // Only sessions with a persisted row get an actor.
        if sessions::get_session(&self.db, session_id).await?.is_none() {
            return Err(SwitchboardError::BadRequest(format!(
                "unknown session {session_id}"
            )));
        }

        let actor = self
            .actors
            .entry(session_id.to_string())
            .or_insert_with(|| {
                SessionActor::spawn(
                    session_id.to_string(),
                    self.db.clone(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.sandbox_client),
                )
            })
            .clone();
        Ok(actor)
    }

    /// Actors currently resident in memory (for shutdown draining).
    pub fn resident_actors(&self) -> Vec<Arc<SessionActor>> {
        self.actors.iter().map(|e| Arc::clone(e.value())).collect()
    }
}
