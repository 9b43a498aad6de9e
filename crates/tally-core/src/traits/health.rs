// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health monitor collaborator trait.

use async_trait::async_trait;

use crate::error::TallyError;
use crate::types::{HealthReport, InstallationRecord};

/// Checks whether an installed plugin is operational.
///
/// Implementations may spawn the plugin and call its identity/health RPC, or
/// inspect the files on disk. A returned error is recorded as
/// [`HealthStatus::Unknown`](crate::types::HealthStatus::Unknown) by callers.
#[async_trait]
pub trait HealthMonitor: Send + Sync + 'static {
    /// Human-readable name of this monitor.
    fn name(&self) -> &str;

    /// Performs one health check for the given installation.
    async fn check(&self, record: &InstallationRecord) -> Result<HealthReport, TallyError>;
}
