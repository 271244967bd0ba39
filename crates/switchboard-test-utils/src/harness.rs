// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Full-stack harness over a temp database.

use std::sync::Arc;

use switchboard_config::SwitchboardConfig;
use switchboard_core::SwitchboardError;
use switchboard_gateway::GatewayState;
use switchboard_session::SessionRegistry;
use switchboard_storage::Database;

use crate::mock_sandbox::MockSandboxClient;

/// Operator secret used by harness-built stacks.
pub const TEST_OPERATOR_SECRET: &str = "test-operator-secret";

/// Builder for test environments with configurable knobs.
pub struct TestHarnessBuilder {
    config: SwitchboardConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = SwitchboardConfig::default();
        config.gateway.operator_secret = Some(TEST_OPERATOR_SECRET.to_string());
        config.auth.token_pepper = Some("test-pepper".to_string());
        config.sandbox.api_secret = Some("test-sandbox-secret".to_string());
        config.sandbox.workspace = Some("test-workspace".to_string());
        config.sandbox.deployment = Some("test".to_string());
        config.sandbox.start_max_attempts = 1;
        config.sandbox.stop_grace_secs = 0;
        config.stream.flush_interval_ms = 10;
        Self { config }
    }

    /// Adjust any config field before the stack is built.
    pub fn with_config(mut self, f: impl FnOnce(&mut SwitchboardConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Build the harness: temp SQLite, registry, hub, artifact store.
    pub async fn build(mut self) -> Result<TestHarness, SwitchboardError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| SwitchboardError::Storage {
            source: e.into(),
        })?;
        let db_path = temp_dir.path().join("harness.db");
        self.config.storage.database_path = db_path.to_string_lossy().to_string();
        self.config.gateway.artifact_dir = temp_dir
            .path()
            .join("artifacts")
            .to_string_lossy()
            .to_string();

        let db = Database::open(&self.config.storage.database_path).await?;
        let sandbox = Arc::new(MockSandboxClient::new());
        let config = Arc::new(self.config);
        let registry = SessionRegistry::new(db.clone(), Arc::clone(&config), sandbox.clone());
        let gateway = GatewayState::new(Arc::clone(&registry));

        Ok(TestHarness {
            db,
            config,
            registry,
            sandbox,
            gateway,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete orchestrator stack wired against mocks.
pub struct TestHarness {
    pub db: Database,
    pub config: Arc<SwitchboardConfig>,
    pub registry: Arc<SessionRegistry>,
    pub sandbox: Arc<MockSandboxClient>,
    pub gateway: GatewayState,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// The gateway router, ready for `tower::ServiceExt::oneshot` calls.
    pub fn router(&self) -> axum::Router {
        switchboard_gateway::server::build_router(self.gateway.clone())
    }
}
