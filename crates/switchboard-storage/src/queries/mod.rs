// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules. Each accepts `&Database` and runs through the
//! single background writer thread.

pub mod events;
pub mod messages;
pub mod participants;
pub mod sandboxes;
pub mod sessions;
