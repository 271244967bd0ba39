// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted sandbox client for tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use switchboard_core::SwitchboardError;
use switchboard_session::sandbox::{
    ExecuteCommand, SandboxClient, StartSandboxRequest, StartedSandbox,
};

/// Records every command and can be scripted to fail provisioning.
#[derive(Default)]
pub struct MockSandboxClient {
    fail_start: AtomicBool,
    start_count: AtomicU32,
    executed: Mutex<Vec<ExecuteCommand>>,
    stop_count: AtomicU32,
    terminate_count: AtomicU32,
}

impl MockSandboxClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `start` calls fail with `sandbox_unavailable`.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> u32 {
        self.terminate_count.load(Ordering::SeqCst)
    }

    /// Every execute command received so far, in order.
    pub fn executed(&self) -> Vec<ExecuteCommand> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxClient for MockSandboxClient {
    async fn start(&self, req: &StartSandboxRequest) -> Result<StartedSandbox, SwitchboardError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SwitchboardError::SandboxUnavailable {
                message: "scripted start failure".into(),
                source: None,
            });
        }
        Ok(StartedSandbox {
            sandbox_id: format!("sb-{}", req.session_id),
            hostname: Some("mock.internal".into()),
        })
    }

    async fn execute(&self, _sandbox_id: &str, cmd: &ExecuteCommand) -> Result<(), SwitchboardError> {
        self.executed.lock().unwrap().push(cmd.clone());
        Ok(())
    }

    async fn stop(&self, _sandbox_id: &str) -> Result<(), SwitchboardError> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self, _sandbox_id: &str) -> Result<(), SwitchboardError> {
        self.terminate_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
