// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Switchboard orchestrator.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};
use switchboard_core::models::DEFAULT_MODEL;

/// Top-level Switchboard configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values;
/// secrets default to `None` and are validated at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchboardConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP/WebSocket gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Subscriber token hashing.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Remote sandbox runtime settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Model defaults.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Streaming token aggregation.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Subscriber channel tuning.
    #[serde(default)]
    pub subscribers: SubscribersConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl SwitchboardConfig {
    /// Validates that every required secret is present.
    ///
    /// Returns the missing key names; empty means the config is servable.
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.gateway.operator_secret.is_none() {
            missing.push("gateway.operator_secret");
        }
        if self.auth.token_pepper.is_none() {
            missing.push("auth.token_pepper");
        }
        if self.sandbox.api_secret.is_none() {
            missing.push("sandbox.api_secret");
        }
        if self.sandbox.workspace.is_none() {
            missing.push("sandbox.workspace");
        }
        if self.sandbox.deployment.is_none() {
            missing.push("sandbox.deployment");
        }
        missing
    }
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the orchestrator instance.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "switchboard".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP/WebSocket gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret for the operator channel. Required to serve.
    #[serde(default)]
    pub operator_secret: Option<String>,

    /// Directory where uploaded artifacts are stored.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            operator_secret: None,
            artifact_dir: default_artifact_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8790
}

fn default_artifact_dir() -> String {
    "artifacts".to_string()
}

/// Subscriber token hashing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Pepper key mixed into subscriber token digests. Required to serve.
    #[serde(default)]
    pub token_pepper: Option<String>,
}

/// Remote sandbox runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Base URL of the sandbox runtime API.
    #[serde(default = "default_sandbox_base_url")]
    pub base_url: String,

    /// Shared secret for the sandbox runtime API. Required to serve.
    #[serde(default)]
    pub api_secret: Option<String>,

    /// Workspace identifier passed on sandbox provisioning. Required.
    #[serde(default)]
    pub workspace: Option<String>,

    /// Deployment name passed on sandbox provisioning. Required.
    #[serde(default)]
    pub deployment: Option<String>,

    /// Seconds without a heartbeat before a live sandbox is presumed dead.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Seconds to wait after `stop()` for the sandbox to acknowledge before
    /// the processing message is cancelled.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Maximum sandbox start / command attempts before giving up.
    #[serde(default = "default_start_max_attempts")]
    pub start_max_attempts: u32,

    /// Per-request deadline for sandbox RPCs.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_url: default_sandbox_base_url(),
            api_secret: None,
            workspace: None,
            deployment: None,
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            start_max_attempts: default_start_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_sandbox_base_url() -> String {
    "http://127.0.0.1:8791".to_string()
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_start_max_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Model defaults. The closed catalog of valid identifiers lives in
/// `switchboard-core::models`; this section only picks the default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    /// Default model for new sessions.
    #[serde(default = "default_model")]
    pub default: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Streaming token aggregation tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Flush quantum for buffered streaming tokens, in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum buffered tokens before a size-triggered flush.
    #[serde(default = "default_max_buffer_tokens")]
    pub max_buffer_tokens: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_buffer_tokens: default_max_buffer_tokens(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_max_buffer_tokens() -> usize {
    100
}

/// Subscriber channel tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SubscribersConfig {
    /// Number of tail events replayed to a newly-subscribed client.
    #[serde(default = "default_replay_limit")]
    pub replay_limit: u32,

    /// Per-connection outbound queue depth; exceeding it closes the connection.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Seconds without a ping before an idle connection is closed.
    #[serde(default = "default_ping_grace_secs")]
    pub ping_grace_secs: u64,
}

impl Default for SubscribersConfig {
    fn default() -> Self {
        Self {
            replay_limit: default_replay_limit(),
            queue_depth: default_queue_depth(),
            ping_grace_secs: default_ping_grace_secs(),
        }
    }
}

fn default_replay_limit() -> u32 {
    200
}

fn default_queue_depth() -> usize {
    256
}

fn default_ping_grace_secs() -> u64 {
    60
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "switchboard.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.agent.name, "switchboard");
        assert_eq!(config.gateway.port, 8790);
        assert_eq!(config.stream.flush_interval_ms, 50);
        assert_eq!(config.stream.max_buffer_tokens, 100);
        assert_eq!(config.subscribers.replay_limit, 200);
        assert_eq!(config.sandbox.stop_grace_secs, 10);
        assert_eq!(config.models.default, DEFAULT_MODEL);
    }

    #[test]
    fn missing_secrets_lists_all_required_keys() {
        let config = SwitchboardConfig::default();
        let missing = config.missing_secrets();
        assert!(missing.contains(&"gateway.operator_secret"));
        assert!(missing.contains(&"auth.token_pepper"));
        assert!(missing.contains(&"sandbox.api_secret"));
        assert!(missing.contains(&"sandbox.workspace"));
        assert!(missing.contains(&"sandbox.deployment"));
    }

    #[test]
    fn missing_secrets_empty_when_all_present() {
        let mut config = SwitchboardConfig::default();
        config.gateway.operator_secret = Some("op".into());
        config.auth.token_pepper = Some("pepper".into());
        config.sandbox.api_secret = Some("sb".into());
        config.sandbox.workspace = Some("ws".into());
        config.sandbox.deployment = Some("prod".into());
        assert!(config.missing_secrets().is_empty());
    }
}
