// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end actor behavior over a temp database and a scripted sandbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use switchboard_config::SwitchboardConfig;
use switchboard_core::{MessageSource, SwitchboardError};
use switchboard_session::actor::{EnqueueRequest, IssueTokenRequest};
use switchboard_session::registry::{InitSessionRequest, SessionRegistry};
use switchboard_session::sandbox::{
    ExecuteCommand, SandboxClient, StartSandboxRequest, StartedSandbox,
};
use switchboard_session::{IngressOutcome, SandboxEventPayload};
use switchboard_storage::queries::{messages, participants, sandboxes};
use switchboard_storage::Database;

/// Scripted sandbox client: records commands, optionally fails to start.
#[derive(Default)]
struct MockSandbox {
    fail_start: AtomicBool,
    executed: Mutex<Vec<ExecuteCommand>>,
    stops: Mutex<u32>,
}

#[async_trait]
impl SandboxClient for MockSandbox {
    async fn start(&self, _req: &StartSandboxRequest) -> Result<StartedSandbox, SwitchboardError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SwitchboardError::SandboxUnavailable {
                message: "scripted start failure".into(),
                source: None,
            });
        }
        Ok(StartedSandbox {
            sandbox_id: "sb-mock".into(),
            hostname: Some("mock.internal".into()),
        })
    }

    async fn execute(&self, _sandbox_id: &str, cmd: &ExecuteCommand) -> Result<(), SwitchboardError> {
        self.executed.lock().unwrap().push(cmd.clone());
        Ok(())
    }

    async fn stop(&self, _sandbox_id: &str) -> Result<(), SwitchboardError> {
        *self.stops.lock().unwrap() += 1;
        Ok(())
    }

    async fn terminate(&self, _sandbox_id: &str) -> Result<(), SwitchboardError> {
        Ok(())
    }
}

struct TestRig {
    registry: Arc<SessionRegistry>,
    sandbox: Arc<MockSandbox>,
    db: Database,
    _dir: tempfile::TempDir,
}

async fn rig() -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("actor.db");
    let db = Database::open(db_path.to_str().unwrap()).await.unwrap();

    let mut config = SwitchboardConfig::default();
    config.auth.token_pepper = Some("test-pepper".into());
    config.sandbox.workspace = Some("test-ws".into());
    config.sandbox.deployment = Some("test".into());
    config.sandbox.stop_grace_secs = 0;
    config.sandbox.start_max_attempts = 1;
    config.stream.flush_interval_ms = 10;

    let sandbox = Arc::new(MockSandbox::default());
    let registry = SessionRegistry::new(db.clone(), Arc::new(config), sandbox.clone());
    TestRig {
        registry,
        sandbox,
        db,
        _dir: dir,
    }
}

fn init_req(name: &str) -> InitSessionRequest {
    InitSessionRequest {
        session_name: name.to_string(),
        repo_owner: "octo".into(),
        repo_name: "widgets".into(),
        repo_id: None,
        user_id: "user-1".into(),
        model: None,
        reasoning_effort: None,
        github_login: None,
    }
}

fn prompt(content: &str) -> EnqueueRequest {
    EnqueueRequest {
        content: content.to_string(),
        author_id: "user-1".into(),
        source: MessageSource::Web,
        attachments: None,
        callback_context: None,
        reasoning_effort: None,
    }
}

#[tokio::test]
async fn enqueue_dispatches_and_appends_user_message_event() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-basic")).await.unwrap();

    let resp = actor.enqueue_prompt(prompt("Fix the login bug")).await.unwrap();

    // The dispatcher picked it up straight away.
    let msg = messages::get_message(&rig.db, &resp.message_id)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(msg.status.as_str(), "pending" | "processing"));

    // A user_message event with the matching message id exists.
    let page = actor.list_events(Some("user_message"), 10, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].message_id.as_deref(), Some(resp.message_id.as_str()));
    let data: serde_json::Value = serde_json::from_str(&page.items[0].data).unwrap();
    assert_eq!(data["content"], "Fix the login bug");

    // The sandbox received exactly one execute for this message.
    let executed = rig.sandbox.executed.lock().unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].message_id, resp.message_id);
}

#[tokio::test]
async fn second_prompt_waits_for_completion() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-queue")).await.unwrap();

    let first = actor.enqueue_prompt(prompt("first")).await.unwrap();
    let second = actor.enqueue_prompt(prompt("second")).await.unwrap();

    // Only the first is in flight.
    let processing = messages::processing_message(&rig.db, "sess-queue")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processing.id, first.message_id);
    let second_row = messages::get_message(&rig.db, &second.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second_row.status, "pending");
    assert_eq!(rig.sandbox.executed.lock().unwrap().len(), 1);

    // Completion advances the queue to the second prompt.
    let outcome = actor
        .ingest(payload_complete(&first.message_id, true))
        .await
        .unwrap();
    assert_eq!(outcome, IngressOutcome::Persisted);

    let first_row = messages::get_message(&rig.db, &first.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_row.status, "completed");
    assert!(first_row.completed_at.is_some());

    let processing = messages::processing_message(&rig.db, "sess-queue")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processing.id, second.message_id);
    assert_eq!(rig.sandbox.executed.lock().unwrap().len(), 2);
}

fn payload_complete(message_id: &str, success: bool) -> SandboxEventPayload {
    serde_json::from_value(serde_json::json!({
        "type": "execution_complete",
        "sandboxId": "sb-mock",
        "messageId": message_id,
        "success": success,
        "timestamp": 1_700_000_000_000i64,
    }))
    .unwrap()
}

#[tokio::test]
async fn duplicate_completion_is_ignored() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-dup")).await.unwrap();
    let resp = actor.enqueue_prompt(prompt("work")).await.unwrap();

    let first = actor
        .ingest(payload_complete(&resp.message_id, true))
        .await
        .unwrap();
    assert_eq!(first, IngressOutcome::Persisted);

    // A contradictory second completion must not flip the terminal state.
    let second = actor
        .ingest(payload_complete(&resp.message_id, false))
        .await
        .unwrap();
    assert_eq!(second, IngressOutcome::Ignored);

    let row = messages::get_message(&rig.db, &resp.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "completed");
}

#[tokio::test]
async fn heartbeat_updates_record_without_event() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-hb")).await.unwrap();

    let outcome = actor
        .ingest(
            serde_json::from_value(serde_json::json!({
                "type": "heartbeat",
                "sandboxId": "sb-1",
                "status": "running",
                "timestamp": 1_700_000_000_000i64,
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, IngressOutcome::HeartbeatRecorded);

    let record = sandboxes::get_sandbox(&rig.db, "sess-hb").await.unwrap().unwrap();
    assert!(record.last_heartbeat.is_some());
    assert_eq!(record.status, "running");

    // No heartbeat event ever reaches the log.
    let page = actor.list_events(Some("heartbeat"), 10, None).await.unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn sandbox_start_failure_degrades_message_and_continues() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-fail")).await.unwrap();
    rig.sandbox.fail_start.store(true, Ordering::SeqCst);

    let resp = actor.enqueue_prompt(prompt("doomed")).await.unwrap();

    let row = messages::get_message(&rig.db, &resp.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.error.as_deref(), Some("sandbox_unavailable"));

    // A synthetic execution_complete reports the failure to subscribers.
    let page = actor
        .list_events(Some("execution_complete"), 10, None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    let data: serde_json::Value = serde_json::from_str(&page.items[0].data).unwrap();
    assert_eq!(data["success"], false);

    // A healthy sandbox lets the next prompt through.
    rig.sandbox.fail_start.store(false, Ordering::SeqCst);
    let next = actor.enqueue_prompt(prompt("retry")).await.unwrap();
    let row = messages::get_message(&rig.db, &next.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "processing");
}

#[tokio::test]
async fn archived_session_rejects_prompts_but_keeps_pending() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-arch")).await.unwrap();

    let first = actor.enqueue_prompt(prompt("before archive")).await.unwrap();
    actor
        .ingest(payload_complete(&first.message_id, true))
        .await
        .unwrap();

    actor.archive().await.unwrap();
    let err = actor.enqueue_prompt(prompt("after archive")).await.unwrap_err();
    assert_eq!(err.kind(), "session_terminal");

    actor.unarchive().await.unwrap();
    let resp = actor.enqueue_prompt(prompt("after unarchive")).await.unwrap();
    let row = messages::get_message(&rig.db, &resp.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "processing");
}

#[tokio::test]
async fn reasoning_effort_precedence_and_silent_drop() {
    let rig = rig().await;
    let mut init = init_req("sess-effort");
    init.reasoning_effort = Some("max".into());
    let actor = rig.registry.init(init).await.unwrap();

    // Per-message override wins and is stored on the row.
    let mut req = prompt("override");
    req.reasoning_effort = Some("high".into());
    let with_override = actor.enqueue_prompt(req).await.unwrap();
    let row = messages::get_message(&rig.db, &with_override.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.reasoning_effort.as_deref(), Some("high"));
    assert_eq!(
        rig.sandbox.executed.lock().unwrap().last().unwrap().reasoning_effort,
        "high"
    );
    actor
        .ingest(payload_complete(&with_override.message_id, true))
        .await
        .unwrap();

    // No override: stored null, session default applies at dispatch.
    let plain = actor.enqueue_prompt(prompt("plain")).await.unwrap();
    let row = messages::get_message(&rig.db, &plain.message_id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.reasoning_effort.is_none());
    assert_eq!(
        rig.sandbox.executed.lock().unwrap().last().unwrap().reasoning_effort,
        "max"
    );
    actor
        .ingest(payload_complete(&plain.message_id, true))
        .await
        .unwrap();

    // Invalid effort is silently dropped.
    let mut req = prompt("invalid effort");
    req.reasoning_effort = Some("turbo".into());
    let dropped = actor.enqueue_prompt(req).await.unwrap();
    let row = messages::get_message(&rig.db, &dropped.message_id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.reasoning_effort.is_none());

    // Session row kept its own effort.
    let state = actor.state().await.unwrap();
    assert_eq!(state.session.reasoning_effort.as_deref(), Some("max"));
}

#[tokio::test]
async fn invalid_effort_at_init_stores_null() {
    let rig = rig().await;
    let mut init = init_req("sess-bad-effort");
    init.reasoning_effort = Some("invalid".into());
    let actor = rig.registry.init(init).await.unwrap();

    let state = actor.state().await.unwrap();
    assert!(state.session.reasoning_effort.is_none());
}

#[tokio::test]
async fn init_is_idempotent() {
    let rig = rig().await;
    rig.registry.init(init_req("sess-idem")).await.unwrap();

    // Re-init with different repo fields: existing state wins.
    let mut again = init_req("sess-idem");
    again.repo_owner = "someone-else".into();
    let actor = rig.registry.init(again).await.unwrap();
    let state = actor.state().await.unwrap();
    assert_eq!(state.session.repo_owner, "octo");

    let all = participants::list_participants(&rig.db, "sess-idem").await.unwrap();
    assert_eq!(all.len(), 1, "owner is not duplicated");
    assert_eq!(all[0].role, "owner");
}

#[tokio::test]
async fn issued_token_is_stored_only_as_digest() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-token")).await.unwrap();

    let issued = actor
        .issue_ws_token(IssueTokenRequest {
            user_id: "user-1".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!issued.token.is_empty());

    let rows = participants::list_participants(&rig.db, "sess-token").await.unwrap();
    let stored = rows[0].ws_auth_token.as_deref().unwrap();
    assert_eq!(stored.len(), 64);
    assert!(stored.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(stored, issued.token);

    // The raw token authorizes; a wrong one does not.
    let authorized = actor.authorize_token(&issued.token).await.unwrap();
    assert_eq!(authorized.unwrap().id, issued.participant_id);
    assert!(actor.authorize_token("not-the-token").await.unwrap().is_none());
}

#[tokio::test]
async fn missing_user_id_is_bad_request() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-nouser")).await.unwrap();
    let err = actor
        .issue_ws_token(IssueTokenRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "bad_request");
    assert!(err.to_string().contains("userId is required"));
}

#[tokio::test]
async fn token_events_aggregate_into_single_log_entries() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-tokens")).await.unwrap();
    let resp = actor.enqueue_prompt(prompt("stream me")).await.unwrap();

    for chunk in ["Hel", "lo ", "wor", "ld"] {
        let payload: SandboxEventPayload = serde_json::from_value(serde_json::json!({
            "type": "token",
            "sandboxId": "sb-mock",
            "messageId": resp.message_id,
            "content": chunk,
            "timestamp": 1_700_000_000_000i64,
        }))
        .unwrap();
        let outcome = actor.ingest(payload).await.unwrap();
        assert_eq!(outcome, IngressOutcome::Buffered);
    }

    // The completion flushes the buffer before persisting itself.
    actor
        .ingest(payload_complete(&resp.message_id, true))
        .await
        .unwrap();

    // Give the token worker its turn.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let page = actor.list_events(Some("token"), 10, None).await.unwrap();
    let combined: String = page
        .items
        .iter()
        .map(|e| {
            let data: serde_json::Value = serde_json::from_str(&e.data).unwrap();
            data["content"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(combined, "Hello world");
    assert!(
        page.items.len() < 4,
        "tokens must be batched, not persisted one-by-one"
    );
}

#[tokio::test]
async fn git_sync_completed_updates_sha_and_readiness() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-git")).await.unwrap();
    actor.enqueue_prompt(prompt("sync work")).await.unwrap();

    let payload: SandboxEventPayload = serde_json::from_value(serde_json::json!({
        "type": "git_sync",
        "sandboxId": "sb-mock",
        "status": "completed",
        "sha": "deadbeef01",
        "timestamp": 1_700_000_000_000i64,
    }))
    .unwrap();
    actor.ingest(payload).await.unwrap();

    let state = actor.state().await.unwrap();
    assert_eq!(state.session.current_sha.as_deref(), Some("deadbeef01"));
    assert_eq!(
        state.sandbox.unwrap().git_sync_status.as_deref(),
        Some("completed")
    );

    let page = actor.list_events(Some("git_sync"), 10, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn stop_cancels_after_grace_when_sandbox_stays_silent() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-stop")).await.unwrap();
    let resp = actor.enqueue_prompt(prompt("long running")).await.unwrap();

    assert!(actor.stop().await.unwrap());
    assert_eq!(*rig.sandbox.stops.lock().unwrap(), 1);

    // Grace is zero in this rig; the cancel lands almost immediately.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let row = messages::get_message(&rig.db, &resp.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "cancelled");

    let record = sandboxes::get_sandbox(&rig.db, "sess-stop").await.unwrap().unwrap();
    assert_eq!(record.status, "stopped");
}

#[tokio::test]
async fn stop_with_nothing_processing_is_a_noop() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-stop-idle")).await.unwrap();
    assert!(!actor.stop().await.unwrap());
    assert_eq!(*rig.sandbox.stops.lock().unwrap(), 0);
}

#[tokio::test]
async fn duplicate_event_ids_are_dropped() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-dupid")).await.unwrap();

    let payload: SandboxEventPayload = serde_json::from_value(serde_json::json!({
        "type": "error",
        "id": "evt-1",
        "sandboxId": "sb-mock",
        "error": "boom",
        "timestamp": 1_700_000_000_000i64,
    }))
    .unwrap();
    assert_eq!(
        actor.ingest(payload.clone()).await.unwrap(),
        IngressOutcome::Persisted
    );
    assert_eq!(actor.ingest(payload).await.unwrap(), IngressOutcome::Ignored);

    let page = actor.list_events(Some("error"), 10, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn stale_heartbeat_forces_stop_and_redispatches() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("reconcile.db");
    let db = Database::open(db_path.to_str().unwrap()).await.unwrap();

    let mut config = SwitchboardConfig::default();
    config.auth.token_pepper = Some("test-pepper".into());
    config.sandbox.workspace = Some("test-ws".into());
    config.sandbox.deployment = Some("test".into());
    config.sandbox.start_max_attempts = 1;
    // Zero staleness threshold: every live record is immediately stale.
    config.sandbox.heartbeat_timeout_secs = 0;

    let sandbox = Arc::new(MockSandbox::default());
    let registry = SessionRegistry::new(db.clone(), Arc::new(config), sandbox.clone());

    let actor = registry.init(init_req("sess-stale")).await.unwrap();
    let resp = actor.enqueue_prompt(prompt("long job")).await.unwrap();
    assert_eq!(sandbox.executed.lock().unwrap().len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    switchboard_session::reconciler::reconcile_once(&registry)
        .await
        .unwrap();

    // The in-flight message stayed processing and was re-driven onto a
    // fresh sandbox (execute is idempotent by message id).
    let row = messages::get_message(&db, &resp.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "processing");
    let executed = sandbox.executed.lock().unwrap();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[1].message_id, resp.message_id);
}

#[tokio::test]
async fn replay_tail_dedups_tool_calls() {
    let rig = rig().await;
    let actor = rig.registry.init(init_req("sess-replay")).await.unwrap();

    for (id, state) in [("tc-1", "started"), ("tc-2", "finished")] {
        let payload: SandboxEventPayload = serde_json::from_value(serde_json::json!({
            "type": "tool_call",
            "id": id,
            "callId": "call-1",
            "state": state,
            "sandboxId": "sb-mock",
            "timestamp": 1_700_000_000_000i64,
        }))
        .unwrap();
        actor.ingest(payload).await.unwrap();
    }

    // The log keeps both revisions.
    let page = actor.list_events(Some("tool_call"), 10, None).await.unwrap();
    assert_eq!(page.items.len(), 2);

    // Replay shows only the latest per call id.
    let tail = actor.replay_tail().await.unwrap();
    let tool_calls: Vec<_> = tail.iter().filter(|e| e.event_type == "tool_call").collect();
    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_calls[0].id, "tc-2");
}
