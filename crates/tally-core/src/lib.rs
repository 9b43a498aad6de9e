// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tally plugin registry.
//!
//! This crate provides the error type, the shared value types, and the
//! collaborator traits used throughout the Tally workspace.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::TallyError;
pub use traits::{HealthMonitor, Sandbox};
pub use types::{
    ErrorCode, HealthReport, HealthStatus, InstallMethod, InstallMode, InstallationRecord,
    InstalledDependency, LifecycleState, Permission, TrustLevel,
};

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysHealthy;

    #[async_trait::async_trait]
    impl HealthMonitor for AlwaysHealthy {
        fn name(&self) -> &str {
            "always-healthy"
        }

        async fn check(&self, _record: &InstallationRecord) -> Result<HealthReport, TallyError> {
            Ok(HealthReport::new(HealthStatus::Healthy, None))
        }
    }

    #[test]
    fn collaborator_traits_are_object_safe() {
        fn _assert_monitor(_: &dyn HealthMonitor) {}
        fn _assert_sandbox(_: &dyn Sandbox) {}
    }

    #[tokio::test]
    async fn health_monitor_dispatch() {
        let record = InstallationRecord {
            name: "aws-cost".into(),
            version: semver::Version::new(1, 0, 0),
            installed_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            method: InstallMethod::Binary,
            install_dir: "/tmp/aws-cost".into(),
            files: vec![],
            entry_point: None,
            state: LifecycleState::Installed,
            trust_level: TrustLevel::Community,
            dependencies: vec![],
            health: HealthReport::unknown(),
            needs_attention: false,
            manifest_json: "{}".into(),
        };
        let monitor: Box<dyn HealthMonitor> = Box::new(AlwaysHealthy);
        let report = monitor.check(&record).await.unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.checked_at.is_some());
    }
}
