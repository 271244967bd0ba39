// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandbox lifecycle control and the command channel to the remote runtime.
//!
//! The [`SandboxClient`] trait is the seam to the sandbox runtime API; the
//! HTTP implementation authenticates with the sandbox API secret and applies
//! a per-call deadline. The [`SandboxController`] owns the per-session state
//! machine `pending -> warming -> syncing -> ready -> running -> stopped`
//! (plus terminal `failed`) and retries transient failures with capped
//! exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchboard_core::{now_ms, SandboxStatus, SwitchboardError};
use switchboard_storage::{queries::sandboxes, Database, SandboxRow};
use tracing::{debug, warn};

/// Provisioning request for a new sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct StartSandboxRequest {
    pub session_id: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub workspace: String,
    pub deployment: String,
}

/// A freshly provisioned sandbox as reported by the runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct StartedSandbox {
    pub sandbox_id: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// An execute command dispatched to a running sandbox.
///
/// Idempotent by `message_id`: the runtime deduplicates redelivery.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCommand {
    pub message_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<serde_json::Value>,
    pub reasoning_effort: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_context: Option<serde_json::Value>,
}

/// Command surface to the remote sandbox runtime.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn start(&self, req: &StartSandboxRequest) -> Result<StartedSandbox, SwitchboardError>;
    async fn execute(&self, sandbox_id: &str, cmd: &ExecuteCommand) -> Result<(), SwitchboardError>;
    async fn stop(&self, sandbox_id: &str) -> Result<(), SwitchboardError>;
    async fn terminate(&self, sandbox_id: &str) -> Result<(), SwitchboardError>;
}

/// HTTP client for the sandbox runtime API.
#[derive(Clone)]
pub struct HttpSandboxClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpSandboxClient {
    /// Build a client against `base_url`, authenticating every request with
    /// the sandbox API secret.
    pub fn new(
        base_url: String,
        api_secret: &str,
        request_timeout: Duration,
    ) -> Result<Self, SwitchboardError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_secret}"))
            .map_err(|e| SwitchboardError::Config(format!("invalid sandbox api secret: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| SwitchboardError::SandboxUnavailable {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, SwitchboardError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                SwitchboardError::Timeout {
                    duration: self.request_timeout,
                }
            } else {
                SwitchboardError::SandboxUnavailable {
                    message: format!("request to {url} failed: {e}"),
                    source: Some(Box::new(e)),
                }
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SwitchboardError::SandboxUnavailable {
                message: format!("sandbox runtime returned {status} for {url}"),
                source: None,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn start(&self, req: &StartSandboxRequest) -> Result<StartedSandbox, SwitchboardError> {
        let response = self.post_json("/sandboxes", req).await?;
        response
            .json::<StartedSandbox>()
            .await
            .map_err(|e| SwitchboardError::SandboxUnavailable {
                message: format!("malformed start response: {e}"),
                source: Some(Box::new(e)),
            })
    }

    async fn execute(&self, sandbox_id: &str, cmd: &ExecuteCommand) -> Result<(), SwitchboardError> {
        self.post_json(&format!("/sandboxes/{sandbox_id}/execute"), cmd)
            .await?;
        Ok(())
    }

    async fn stop(&self, sandbox_id: &str) -> Result<(), SwitchboardError> {
        self.post_json(&format!("/sandboxes/{sandbox_id}/stop"), &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn terminate(&self, sandbox_id: &str) -> Result<(), SwitchboardError> {
        self.post_json(
            &format!("/sandboxes/{sandbox_id}/terminate"),
            &serde_json::json!({}),
        )
        .await?;
        Ok(())
    }
}

/// Tuning for the controller's retry loop and grace periods.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub workspace: String,
    pub deployment: String,
    pub max_attempts: u32,
    pub stop_grace: Duration,
}

/// Per-session sandbox lifecycle controller.
///
/// Owns the declared-status record; the actor composes it and broadcasts the
/// resulting status frames.
pub struct SandboxController {
    session_id: String,
    db: Database,
    client: Arc<dyn SandboxClient>,
    settings: ControllerSettings,
}

impl SandboxController {
    pub fn new(
        session_id: String,
        db: Database,
        client: Arc<dyn SandboxClient>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            session_id,
            db,
            client,
            settings,
        }
    }

    pub fn stop_grace(&self) -> Duration {
        self.settings.stop_grace
    }

    /// The current sandbox record, if one has ever been provisioned.
    pub async fn record(&self) -> Result<Option<SandboxRow>, SwitchboardError> {
        sandboxes::get_sandbox(&self.db, &self.session_id).await
    }

    /// Ensure a live sandbox exists, provisioning one when necessary.
    ///
    /// Returns the sandbox id. Provisioning retries with exponential backoff
    /// up to the configured attempt cap; exhaustion surfaces as
    /// `sandbox_unavailable` and marks the record `failed`.
    pub async fn ensure_running(
        &self,
        repo_owner: &str,
        repo_name: &str,
    ) -> Result<String, SwitchboardError> {
        if let Some(record) = self.record().await? {
            let status: SandboxStatus = record
                .status
                .parse()
                .unwrap_or(SandboxStatus::Failed);
            if status.is_live() {
                if let Some(id) = record.sandbox_id {
                    return Ok(id);
                }
            }
        }

        let req = StartSandboxRequest {
            session_id: self.session_id.clone(),
            repo_owner: repo_owner.to_string(),
            repo_name: repo_name.to_string(),
            workspace: self.settings.workspace.clone(),
            deployment: self.settings.deployment.clone(),
        };

        self.set_status(SandboxStatus::Warming, None, None).await?;

        let started = self
            .with_retries("start", || self.client.start(&req))
            .await;

        match started {
            Ok(started) => {
                sandboxes::upsert_sandbox(
                    &self.db,
                    &SandboxRow {
                        session_id: self.session_id.clone(),
                        sandbox_id: Some(started.sandbox_id.clone()),
                        status: SandboxStatus::Warming.to_string(),
                        last_heartbeat: None,
                        git_sync_status: None,
                        hostname: started.hostname.clone(),
                        updated_at: now_ms(),
                    },
                )
                .await?;
                debug!(
                    session_id = self.session_id.as_str(),
                    sandbox_id = started.sandbox_id.as_str(),
                    "sandbox provisioned"
                );
                Ok(started.sandbox_id)
            }
            Err(e) => {
                self.set_status(SandboxStatus::Failed, None, None).await?;
                Err(e)
            }
        }
    }

    /// Dispatch an execute command, retrying transient failures.
    pub async fn execute(
        &self,
        sandbox_id: &str,
        cmd: &ExecuteCommand,
    ) -> Result<(), SwitchboardError> {
        self.with_retries("execute", || self.client.execute(sandbox_id, cmd))
            .await?;
        self.set_status(SandboxStatus::Running, None, None).await?;
        Ok(())
    }

    /// Best-effort cancel of the running execution.
    pub async fn request_stop(&self) -> Result<(), SwitchboardError> {
        if let Some(record) = self.record().await? {
            if let Some(sandbox_id) = record.sandbox_id {
                return self.client.stop(&sandbox_id).await;
            }
        }
        Ok(())
    }

    /// Tear the sandbox down entirely.
    pub async fn terminate(&self) -> Result<(), SwitchboardError> {
        if let Some(record) = self.record().await? {
            if let Some(sandbox_id) = record.sandbox_id {
                self.client.terminate(&sandbox_id).await?;
            }
        }
        self.set_status(SandboxStatus::Stopped, None, None).await
    }

    /// Force the declared status (used by stop-grace expiry and the
    /// heartbeat reconciler).
    pub async fn set_status(
        &self,
        status: SandboxStatus,
        sandbox_id: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<(), SwitchboardError> {
        let now = now_ms();
        if let Some(mut record) = self.record().await? {
            record.status = status.to_string();
            if let Some(id) = sandbox_id {
                record.sandbox_id = Some(id.to_string());
            }
            if let Some(host) = hostname {
                record.hostname = Some(host.to_string());
            }
            record.updated_at = now;
            sandboxes::upsert_sandbox(&self.db, &record).await
        } else {
            sandboxes::upsert_sandbox(
                &self.db,
                &SandboxRow {
                    session_id: self.session_id.clone(),
                    sandbox_id: sandbox_id.map(|s| s.to_string()),
                    status: status.to_string(),
                    last_heartbeat: None,
                    git_sync_status: None,
                    hostname: hostname.map(|s| s.to_string()),
                    updated_at: now,
                },
            )
            .await
        }
    }

    async fn with_retries<T, F, Fut>(
        &self,
        what: &str,
        mut op: F,
    ) -> Result<T, SwitchboardError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SwitchboardError>>,
    {
        let mut last_error = None;
        for attempt in 0..self.settings.max_attempts {
            if attempt > 0 {
                let backoff = Duration::from_millis(250 * (1u64 << (attempt - 1).min(6)));
                warn!(
                    session_id = self.session_id.as_str(),
                    what,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying sandbox call after transient error"
                );
                tokio::time::sleep(backoff).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) => e,
            None => SwitchboardError::SandboxUnavailable {
                message: format!("sandbox {what} failed with no attempts made"),
                source: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpSandboxClient {
        HttpSandboxClient::new(server.uri(), "sb-secret", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn start_parses_sandbox_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sandbox_id": "sb-42",
                "hostname": "sb-42.internal"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let started = client
            .start(&StartSandboxRequest {
                session_id: "sess-1".into(),
                repo_owner: "octo".into(),
                repo_name: "widgets".into(),
                workspace: "ws".into(),
                deployment: "prod".into(),
            })
            .await
            .unwrap();
        assert_eq!(started.sandbox_id, "sb-42");
        assert_eq!(started.hostname.as_deref(), Some("sb-42.internal"));
    }

    #[tokio::test]
    async fn non_success_status_is_sandbox_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sb-1/execute"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .execute(
                "sb-1",
                &ExecuteCommand {
                    message_id: "m1".into(),
                    content: "do it".into(),
                    attachments: None,
                    reasoning_effort: "medium".into(),
                    callback_context: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sandbox_unavailable");
    }

    #[tokio::test]
    async fn stop_and_terminate_hit_expected_paths() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sb-9/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sb-9/terminate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.stop("sb-9").await.unwrap();
        client.terminate("sb-9").await.unwrap();
    }
}
