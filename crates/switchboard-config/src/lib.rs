// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading and validation for the Switchboard orchestrator.
//!
//! Configuration is merged from TOML files following the XDG hierarchy with
//! `SWITCHBOARD_*` environment variable overrides.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::SwitchboardConfig;
