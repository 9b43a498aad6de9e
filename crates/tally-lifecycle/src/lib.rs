// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin lifecycle: install, update, removal and health.
//!
//! [`LifecycleManager`] drives one plugin at a time through the state
//! machine under a per-name lock. [`Registry`] puts discovery and the
//! manager behind the operations the gateway and CLI expose.

pub mod extract;
pub mod fetch;
pub mod health;
pub mod locks;
pub mod manager;
pub mod registry;
pub mod sandbox;
pub mod state;
pub mod steps;

pub use fetch::{ArtifactFetcher, DefaultFetcher};
pub use health::{FileHealthMonitor, spawn_health_loop};
pub use locks::{NameGuard, NameLocks};
pub use manager::{
    InstallOptions, InstallOutcome, LifecycleManager, LifecycleOptions, RemoveOutcome,
    UpdateOptions, UpdateOutcome,
};
pub use registry::{InstallReport, Registry};
pub use sandbox::ConfiguredSandbox;
pub use state::StateTracker;
