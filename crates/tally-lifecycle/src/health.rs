// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default health monitor and the periodic health loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tally_core::{HealthMonitor, HealthReport, HealthStatus, InstallationRecord, TallyError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::LifecycleManager;

/// Checks installed files on disk.
///
/// `Healthy` when the entry point exists and is executable, `Critical` when
/// it or any recorded file is missing, `Warning` otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileHealthMonitor;

#[async_trait]
impl HealthMonitor for FileHealthMonitor {
    fn name(&self) -> &str {
        "files"
    }

    async fn check(&self, record: &InstallationRecord) -> Result<HealthReport, TallyError> {
        let Some(entry) = &record.entry_point else {
            return Ok(HealthReport::new(
                HealthStatus::Warning,
                Some("no entry point recorded".to_string()),
            ));
        };

        let meta = match tokio::fs::metadata(entry).await {
            Ok(meta) => meta,
            Err(e) => {
                return Ok(HealthReport::new(
                    HealthStatus::Critical,
                    Some(format!("entry point {} is unavailable: {e}", entry.display())),
                ));
            }
        };

        let mut missing = 0;
        for file in &record.files {
            if tokio::fs::metadata(file).await.is_err() {
                missing += 1;
            }
        }
        if missing > 0 {
            return Ok(HealthReport::new(
                HealthStatus::Critical,
                Some(format!("{missing} installed file(s) are missing")),
            ));
        }

        if !meta.is_file() || !is_executable(&meta) {
            return Ok(HealthReport::new(
                HealthStatus::Warning,
                Some(format!("entry point {} is not executable", entry.display())),
            ));
        }
        Ok(HealthReport::new(HealthStatus::Healthy, None))
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

/// Run health checks over every installed plugin each `interval` until
/// `cancel` fires.
pub fn spawn_health_loop(
    manager: Arc<LifecycleManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "periodic health checks started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; installs already ran a check.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match manager.check_all().await {
                Ok(reports) => {
                    let unhealthy = reports
                        .iter()
                        .filter(|(_, r)| r.status == HealthStatus::Critical)
                        .count();
                    debug!(checked = reports.len(), unhealthy, "periodic health check complete");
                }
                Err(e) => warn!(error = %e, "periodic health check failed"),
            }
        }
        info!("periodic health checks stopped");
    })
}
