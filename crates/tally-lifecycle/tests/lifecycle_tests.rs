// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end lifecycle tests against a temporary install root and database.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use tally_core::{
    HealthMonitor, HealthReport, HealthStatus, InstallationRecord, LifecycleState, TallyError,
    TrustLevel,
};
use tally_discovery::filesystem::FilesystemSource;
use tally_discovery::{DiscoveryEngine, DiscoverySource};
use tally_lifecycle::{
    ConfiguredSandbox, DefaultFetcher, FileHealthMonitor, InstallOptions, LifecycleManager,
    LifecycleOptions, Registry, UpdateOptions,
};
use tally_plugin::{InstallStep, ManifestValidator, PluginManifest, UpdateKind};
use tally_storage::InstallationStore;
use tally_verify::TrustPolicy;
use tempfile::TempDir;

const SCRIPT: &[u8] = b"#!/bin/sh\necho '{}'\n";

fn confirmed() -> InstallOptions {
    InstallOptions {
        confirm_warnings: true,
        ..Default::default()
    }
}

struct Harness {
    dir: TempDir,
    manager: Arc<LifecycleManager>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_monitor(Arc::new(FileHealthMonitor)).await
    }

    async fn with_monitor(monitor: Arc<dyn HealthMonitor>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(dir.path(), monitor).await;
        Self {
            dir,
            manager: Arc::new(manager),
        }
    }

    async fn with_transition_timeout(timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), Arc::new(FileHealthMonitor), timeout).await;
        Self {
            dir,
            manager: Arc::new(manager),
        }
    }

    async fn persisted(&self, name: &str) -> Option<InstallationRecord> {
        let store = InstallationStore::open(self.dir.path().join("tally.db")).await.unwrap();
        store.get(name).await.unwrap()
    }

    fn install_root(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    /// Write an artifact and build a manifest pointing at it.
    fn manifest(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> PluginManifest {
        manifest_in(self.dir.path(), name, version, deps)
    }
}

async fn manager_at(dir: &Path, monitor: Arc<dyn HealthMonitor>) -> LifecycleManager {
    manager_with(dir, monitor, Duration::from_secs(30)).await
}

async fn manager_with(
    dir: &Path,
    monitor: Arc<dyn HealthMonitor>,
    transition_timeout: Duration,
) -> LifecycleManager {
    let store = InstallationStore::open(dir.join("tally.db")).await.unwrap();
    let options = LifecycleOptions {
        install_root: dir.join("plugins"),
        transition_timeout,
        step_timeout: Duration::from_secs(5),
    };
    let manager = LifecycleManager::new(
        store,
        TrustPolicy::default(),
        options,
        Arc::new(DefaultFetcher::new(Duration::from_secs(5)).unwrap()),
        monitor,
        Arc::new(ConfiguredSandbox::new("none", false)),
    );
    manager.load().await.unwrap();
    manager
}

fn manifest_doc(dir: &Path, name: &str, version: &str, deps: &[(&str, &str)]) -> serde_json::Value {
    let artifacts = dir.join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();
    let artifact = artifacts.join(format!("{name}-{version}"));
    std::fs::write(&artifact, SCRIPT).unwrap();
    let checksum = hex::encode(Sha256::digest(SCRIPT));

    let dependencies: Vec<_> = deps
        .iter()
        .map(|(n, c)| json!({ "name": n, "version": c }))
        .collect();
    json!({
        "schema_version": "1.0.0",
        "name": name,
        "version": version,
        "author": "FinOps Team",
        "description": format!("{name} cost source"),
        "security": { "trust_level": "verified" },
        "installation": {
            "method": "binary",
            "download_url": artifact.to_string_lossy(),
            "checksum": format!("sha256:{checksum}")
        },
        "requirements": { "dependencies": dependencies }
    })
}

fn manifest_in(dir: &Path, name: &str, version: &str, deps: &[(&str, &str)]) -> PluginManifest {
    PluginManifest::from_value(manifest_doc(dir, name, version, deps)).unwrap()
}

#[tokio::test]
async fn clean_install_is_persisted() {
    let h = Harness::new().await;
    let m = h.manifest("aws-cost", "2.1.0", &[]);

    let outcome = h.manager.install(&m, confirmed()).await.unwrap();
    assert_eq!(outcome.record.state, LifecycleState::Installed);
    assert_eq!(outcome.record.trust_level, TrustLevel::Verified);
    assert_eq!(outcome.record.install_dir, h.install_root().join("aws-cost/2.1.0"));
    assert_eq!(outcome.health.status, HealthStatus::Healthy);
    assert!(h.manager.transient_state("aws-cost").is_none());

    // A fresh store over the same database sees the record.
    let store = InstallationStore::open(h.dir.path().join("tally.db")).await.unwrap();
    let record = store.get("aws-cost").await.unwrap().unwrap();
    assert_eq!(record.version.to_string(), "2.1.0");
    assert_eq!(record.health.status, HealthStatus::Healthy);
}

fn run_after_install(m: &mut PluginManifest, program: &str, args: &[&str]) {
    m.installation.post_install = vec![InstallStep::Run {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        timeout_secs: None,
    }];
}

#[tokio::test]
async fn failed_post_install_step_removes_files_and_record() {
    let h = Harness::new().await;
    let mut m = h.manifest("aws-cost", "2.1.0", &[]);
    run_after_install(&mut m, "false", &[]);

    h.manager.install(&m, confirmed()).await.unwrap_err();
    assert!(h.manager.get("aws-cost").await.is_none());
    assert!(h.persisted("aws-cost").await.is_none());
    assert!(!h.install_root().join("aws-cost/2.1.0").exists());
    assert!(h.manager.transient_state("aws-cost").is_none());
}

#[tokio::test]
async fn timed_out_install_leaves_nothing_behind() {
    let h = Harness::with_transition_timeout(Duration::from_secs(1)).await;
    let mut slow = h.manifest("aws-cost", "2.1.0", &[]);
    run_after_install(&mut slow, "sleep", &["5"]);

    let err = h.manager.install(&slow, confirmed()).await.unwrap_err();
    assert!(matches!(err, TallyError::Timeout { .. }), "{err}");
    assert!(h.manager.get("aws-cost").await.is_none());
    assert!(h.persisted("aws-cost").await.is_none());
    assert!(!h.install_root().join("aws-cost/2.1.0").exists());

    // Nothing blocks a second attempt.
    let retry = h.manifest("aws-cost", "2.1.0", &[]);
    let outcome = h.manager.install(&retry, confirmed()).await.unwrap();
    assert_eq!(outcome.record.state, LifecycleState::Installed);
}

#[tokio::test]
async fn unconfirmed_warnings_block_install() {
    let h = Harness::new().await;
    let m = h.manifest("aws-cost", "2.1.0", &[]);

    let err = h.manager.install(&m, InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, TallyError::ConfirmationRequired { .. }));
    assert!(h.manager.get("aws-cost").await.is_none());
}

#[tokio::test]
async fn checksum_mismatch_writes_nothing() {
    let h = Harness::new().await;
    let mut m = h.manifest("aws-cost", "2.1.0", &[]);
    m.installation.checksum = format!("sha256:{}", hex::encode(Sha256::digest(b"something else")));

    let err = h.manager.install(&m, confirmed()).await.unwrap_err();
    assert!(matches!(err, TallyError::Security { .. }), "{err}");
    assert!(!h.install_root().join("aws-cost").exists());
    assert!(h.manager.get("aws-cost").await.is_none());
    assert!(h.manager.transient_state("aws-cost").is_none());
}

#[tokio::test]
async fn sandbox_required_without_sandbox_is_denied() {
    let h = Harness::new().await;
    let mut m = h.manifest("aws-cost", "2.1.0", &[]);
    m.security.sandbox_required = true;

    let err = h.manager.install(&m, confirmed()).await.unwrap_err();
    assert!(matches!(err, TallyError::PermissionDenied(_)));
}

#[tokio::test]
async fn second_install_of_same_name_is_refused() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("aws-cost", "2.1.0", &[]), confirmed())
        .await
        .unwrap();
    let err = h
        .manager
        .install(&h.manifest("aws-cost", "2.2.0", &[]), confirmed())
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::FailedPrecondition { .. }));
}

#[tokio::test]
async fn patch_update_replaces_previous_files() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("gcp-cost", "1.0.0", &[]), confirmed())
        .await
        .unwrap();

    let options = UpdateOptions {
        install: confirmed(),
        ..Default::default()
    };
    let outcome = h
        .manager
        .update(&h.manifest("gcp-cost", "1.0.1", &[]), options)
        .await
        .unwrap();

    assert_eq!(outcome.kind, UpdateKind::Patch);
    assert_eq!(outcome.record.version.to_string(), "1.0.1");
    assert!(!h.install_root().join("gcp-cost/1.0.0").exists());
    assert!(h.install_root().join("gcp-cost/1.0.1/gcp-cost").exists());
    assert_eq!(outcome.record.installed_at, h.manager.get("gcp-cost").await.unwrap().installed_at);
}

#[tokio::test]
async fn minor_update_requires_acknowledgment() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("gcp-cost", "1.0.0", &[]), confirmed())
        .await
        .unwrap();

    let target = h.manifest("gcp-cost", "1.1.0", &[]);
    let err = h
        .manager
        .update(
            &target,
            UpdateOptions {
                install: confirmed(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::FailedPrecondition { .. }));
    let record = h.manager.get("gcp-cost").await.unwrap();
    assert_eq!(record.version.to_string(), "1.0.0");
    assert_eq!(record.state, LifecycleState::Installed);

    let outcome = h
        .manager
        .update(
            &target,
            UpdateOptions {
                acknowledge: true,
                install: confirmed(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.kind, UpdateKind::Minor);
}

#[tokio::test]
async fn downgrade_is_refused() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("gcp-cost", "1.2.0", &[]), confirmed())
        .await
        .unwrap();
    let err = h
        .manager
        .update(&h.manifest("gcp-cost", "1.1.0", &[]), UpdateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::FailedPrecondition { .. }));
}

/// Reports every 2.x installation as broken.
struct BrokenMajorTwo;

#[async_trait]
impl HealthMonitor for BrokenMajorTwo {
    fn name(&self) -> &str {
        "broken-major-two"
    }

    async fn check(&self, record: &InstallationRecord) -> Result<HealthReport, TallyError> {
        Ok(if record.version.major >= 2 {
            HealthReport::new(HealthStatus::Critical, Some("exits on start".into()))
        } else {
            HealthReport::new(HealthStatus::Healthy, None)
        })
    }
}

#[tokio::test]
async fn unhealthy_major_update_rolls_back() {
    let h = Harness::with_monitor(Arc::new(BrokenMajorTwo)).await;
    h.manager
        .install(&h.manifest("azure-cost", "1.4.0", &[]), confirmed())
        .await
        .unwrap();

    let options = UpdateOptions {
        force: true,
        install: confirmed(),
        ..Default::default()
    };
    let err = h
        .manager
        .update(&h.manifest("azure-cost", "2.0.0", &[]), options)
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::Runtime { .. }), "{err}");

    let record = h.manager.get("azure-cost").await.unwrap();
    assert_eq!(record.version.to_string(), "1.4.0");
    assert_eq!(record.state, LifecycleState::Installed);
    assert!(h.install_root().join("azure-cost/1.4.0").exists());
    assert!(!h.install_root().join("azure-cost/2.0.0").exists());
}

#[tokio::test]
async fn timed_out_major_update_restores_previous_version() {
    let h = Harness::with_transition_timeout(Duration::from_secs(1)).await;
    h.manager
        .install(&h.manifest("azure-cost", "1.4.0", &[]), confirmed())
        .await
        .unwrap();

    let mut slow = h.manifest("azure-cost", "2.0.0", &[]);
    run_after_install(&mut slow, "sleep", &["5"]);
    let options = UpdateOptions {
        force: true,
        install: confirmed(),
        ..Default::default()
    };
    let err = h.manager.update(&slow, options).await.unwrap_err();
    assert!(matches!(err, TallyError::Timeout { .. }), "{err}");

    let record = h.manager.get("azure-cost").await.unwrap();
    assert_eq!(record.version.to_string(), "1.4.0");
    assert_eq!(record.state, LifecycleState::Installed);
    let persisted = h.persisted("azure-cost").await.unwrap();
    assert_eq!(persisted.version.to_string(), "1.4.0");
    assert_eq!(persisted.state, LifecycleState::Installed);
    assert!(h.install_root().join("azure-cost/1.4.0").exists());
    assert!(!h.install_root().join("azure-cost/2.0.0").exists());
}

#[tokio::test]
async fn failed_patch_update_keeps_flagged_record() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("gcp-cost", "1.0.0", &[]), confirmed())
        .await
        .unwrap();

    let mut broken = h.manifest("gcp-cost", "1.0.1", &[]);
    run_after_install(&mut broken, "false", &[]);
    let options = UpdateOptions {
        install: confirmed(),
        ..Default::default()
    };
    h.manager.update(&broken, options).await.unwrap_err();

    let record = h.manager.get("gcp-cost").await.unwrap();
    assert_eq!(record.version.to_string(), "1.0.0");
    assert_eq!(record.state, LifecycleState::Installed);
    assert!(record.needs_attention);
    assert_eq!(record.health.status, HealthStatus::Critical);
    assert!(h.persisted("gcp-cost").await.unwrap().needs_attention);
    assert!(!h.install_root().join("gcp-cost/1.0.1").exists());
}

#[tokio::test]
async fn healthy_major_update_installs_side_by_side_then_drops_old() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("azure-cost", "1.4.0", &[]), confirmed())
        .await
        .unwrap();

    let major = h.manifest("azure-cost", "2.0.0", &[]);
    let err = h
        .manager
        .update(
            &major,
            UpdateOptions {
                install: confirmed(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::FailedPrecondition { .. }));

    let outcome = h
        .manager
        .update(
            &major,
            UpdateOptions {
                force: true,
                install: confirmed(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.kind, UpdateKind::Major);
    assert!(!h.install_root().join("azure-cost/1.4.0").exists());
    assert!(h.install_root().join("azure-cost/2.0.0").exists());
}

#[tokio::test]
async fn removal_with_dependents_is_blocked_unless_cascaded() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("auth-helper", "1.0.0", &[]), confirmed())
        .await
        .unwrap();
    h.manager
        .install(
            &h.manifest("billing-sync", "3.0.0", &[("auth-helper", "^1.0.0")]),
            confirmed(),
        )
        .await
        .unwrap();

    let err = h.manager.remove("auth-helper", false).await.unwrap_err();
    match err {
        TallyError::FailedPrecondition { dependents, .. } => {
            assert_eq!(dependents, vec!["billing-sync".to_string()]);
        }
        other => panic!("expected failed precondition, got {other}"),
    }
    assert!(h.manager.get("auth-helper").await.is_some());

    let outcome = h.manager.remove("auth-helper", true).await.unwrap();
    assert_eq!(outcome.removed, vec!["billing-sync", "auth-helper"]);
    assert!(h.manager.list().await.is_empty());
    assert!(!h.install_root().join("auth-helper").exists());
}

#[tokio::test]
async fn removing_unknown_plugin_is_not_found() {
    let h = Harness::new().await;
    let err = h.manager.remove("ghost", false).await.unwrap_err();
    assert!(matches!(err, TallyError::NotFound { .. }));
}

#[tokio::test]
async fn operations_on_one_name_are_serialized() {
    let h = Harness::new().await;
    let guard = h.manager.locks().acquire("aws-cost").await;

    let manager = Arc::clone(&h.manager);
    let m = h.manifest("aws-cost", "2.1.0", &[]);
    let install = tokio::spawn(async move { manager.install(&m, confirmed()).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!install.is_finished());
    assert!(h.manager.get("aws-cost").await.is_none());

    drop(guard);
    let outcome = install.await.unwrap().unwrap();
    assert_eq!(outcome.record.name, "aws-cost");
}

#[tokio::test]
async fn interrupted_transition_is_flagged_on_load() {
    let h = Harness::new().await;
    h.manager
        .install(&h.manifest("aws-cost", "2.1.0", &[]), confirmed())
        .await
        .unwrap();

    let store = InstallationStore::open(h.dir.path().join("tally.db")).await.unwrap();
    store.set_state("aws-cost", LifecycleState::Updating).await.unwrap();

    let reloaded = manager_at(h.dir.path(), Arc::new(FileHealthMonitor)).await;
    let record = reloaded.get("aws-cost").await.unwrap();
    assert_eq!(record.state, LifecycleState::Installed);
    assert!(record.needs_attention);
}

#[tokio::test]
async fn check_all_reports_missing_files() {
    let h = Harness::new().await;
    let outcome = h
        .manager
        .install(&h.manifest("aws-cost", "2.1.0", &[]), confirmed())
        .await
        .unwrap();
    std::fs::remove_file(outcome.record.entry_point.unwrap()).unwrap();

    let reports = h.manager.check_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.status, HealthStatus::Critical);
    assert!(h.manager.get("aws-cost").await.unwrap().needs_attention);
}

async fn registry_with(dir: &Path, manifests: &[serde_json::Value]) -> Registry {
    let catalog = dir.join("catalog");
    for (i, doc) in manifests.iter().enumerate() {
        let plugin_dir = catalog.join(format!("entry-{i}"));
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("plugin.json"), doc.to_string()).unwrap();
    }
    let discovery = DiscoveryEngine::new(
        ManifestValidator::new(),
        Duration::from_secs(5),
        Duration::from_secs(60),
    )
    .with_source(
        DiscoverySource::Filesystem(FilesystemSource::new("local", &catalog, true, "plugin.json")),
        0,
        None,
    );
    let manager = manager_at(dir, Arc::new(FileHealthMonitor)).await;
    Registry::new(discovery, Arc::new(manager))
}

#[tokio::test]
async fn registry_installs_dependencies_first() {
    let dir = tempfile::tempdir().unwrap();
    let docs = [
        manifest_doc(dir.path(), "auth-helper", "1.0.0", &[]),
        manifest_doc(dir.path(), "auth-helper", "1.2.0", &[]),
        manifest_doc(dir.path(), "billing-sync", "3.0.0", &[("auth-helper", "^1.0.0")]),
    ];
    let registry = registry_with(dir.path(), &docs).await;

    let report = registry
        .install_plugin("billing-sync", None, confirmed())
        .await
        .unwrap();
    let installed: Vec<_> = report
        .installed
        .iter()
        .map(|o| format!("{}@{}", o.record.name, o.record.version))
        .collect();
    assert_eq!(installed, vec!["auth-helper@1.2.0", "billing-sync@3.0.0"]);
    assert_eq!(registry.list_installed_plugins().await.len(), 2);

    let health = registry.check_plugin_health("billing-sync").await.unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn failed_plan_removes_dependencies_it_installed() {
    let dir = tempfile::tempdir().unwrap();
    let mut root = manifest_doc(dir.path(), "billing-sync", "3.0.0", &[("auth-helper", "^1.0.0")]);
    root["installation"]["checksum"] = json!(format!("sha256:{}", "0".repeat(64)));
    let docs = [manifest_doc(dir.path(), "auth-helper", "1.0.0", &[]), root];
    let registry = registry_with(dir.path(), &docs).await;

    let err = registry
        .install_plugin("billing-sync", None, confirmed())
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::Security { .. }), "{err}");
    assert!(registry.list_installed_plugins().await.is_empty());
    assert!(!dir.path().join("plugins/auth-helper/1.0.0").exists());
}

#[tokio::test]
async fn registry_manifest_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let docs = [
        manifest_doc(dir.path(), "aws-cost", "2.0.0", &[]),
        manifest_doc(dir.path(), "aws-cost", "2.1.0", &[]),
    ];
    let registry = registry_with(dir.path(), &docs).await;

    let latest = registry.get_plugin_manifest("aws-cost", None).await.unwrap();
    assert_eq!(latest.version, "2.1.0");
    let pinned = registry
        .get_plugin_manifest("aws-cost", Some("2.0.0"))
        .await
        .unwrap();
    assert_eq!(pinned.version, "2.0.0");

    assert!(matches!(
        registry.get_plugin_manifest("ghost", None).await,
        Err(TallyError::NotFound { .. })
    ));
    assert!(matches!(
        registry.get_plugin_manifest("aws-cost", Some("9.9.9")).await,
        Err(TallyError::NotFound { .. })
    ));
    assert!(matches!(
        registry.get_plugin_manifest("aws-cost", Some("latest")).await,
        Err(TallyError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn registry_validates_documents() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with(dir.path(), &[]).await;

    let good = manifest_doc(dir.path(), "aws-cost", "2.1.0", &[]);
    assert!(registry.validate_plugin(&good).passed);

    let result = registry
        .validate_plugin_text(r#"{"schema_version": "1.0.0", "name": "Bad Name"}"#)
        .unwrap();
    assert!(!result.passed);
}
