// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! [`TestHarness`] assembles a complete orchestrator stack: temp SQLite
//! database, session registry, subscriber hub, gateway router, and a
//! scripted mock sandbox client. Used by the binary crate's end-to-end
//! tests and available to any crate that needs the full stack.

pub mod harness;
pub mod mock_sandbox;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_sandbox::MockSandboxClient;
