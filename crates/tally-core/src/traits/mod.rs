// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits at the registry's boundary.
//!
//! The registry never runs plugin business logic itself. It consults a
//! [`HealthMonitor`] after installs and periodically, and asks a [`Sandbox`]
//! whether sandboxed installs can be honoured.

pub mod health;
pub mod sandbox;

pub use health::HealthMonitor;
pub use sandbox::Sandbox;
