// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Install, update and removal of plugins.
//!
//! Every operation holds the per-name lock for its plugin(s) and runs under
//! the configured transition timeout. Verification happens on the in-memory
//! artifact, so a security failure never touches the install root. Any
//! failure after extraction removes the files written for that attempt.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use semver::Version;
use serde::Serialize;
use tally_core::{
    HealthMonitor, HealthReport, HealthStatus, InstallMethod, InstallMode, InstallationRecord,
    LifecycleState, Sandbox, TallyError, TrustLevel,
};
use tally_plugin::{ManifestValidator, PluginManifest, UpdateKind, classify_update};
use tally_storage::InstallationStore;
use tally_verify::{TrustPolicy, VerifyContext, verify};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::extract::{self, Extracted};
use crate::fetch::ArtifactFetcher;
use crate::locks::NameLocks;
use crate::state::StateTracker;
use crate::steps::{Phase, StepRunner, check_system};

/// Static settings for the manager.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub install_root: PathBuf,
    pub transition_timeout: Duration,
    pub step_timeout: Duration,
}

/// Caller choices for one installation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Proceed even though validation produced warnings.
    pub confirm_warnings: bool,
    pub mode: InstallMode,
    /// Lower the trust bar for this installation (interactive installs only).
    pub trust_override: Option<TrustLevel>,
}

impl InstallOptions {
    fn verify_context(&self) -> VerifyContext {
        VerifyContext {
            mode: self.mode,
            trust_override: self.trust_override,
        }
    }
}

/// Caller choices for one update.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Required for minor updates.
    pub acknowledge: bool,
    /// Required for major updates.
    pub force: bool,
    pub install: InstallOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub record: InstallationRecord,
    pub health: HealthReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub from: Version,
    pub to: Version,
    pub kind: UpdateKind,
    pub record: InstallationRecord,
    pub health: HealthReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    /// Removed plugins, dependents first.
    pub removed: Vec<String>,
}

/// Artifact that passed every check before extraction.
struct Prepared {
    artifact: Vec<u8>,
    method: InstallMethod,
    trust_level: TrustLevel,
}

/// `current` after its files were lost mid-update.
fn stranded(current: &InstallationRecord, reason: String) -> InstallationRecord {
    let mut record = current.clone();
    record.state = LifecycleState::Installed;
    record.needs_attention = true;
    record.health = HealthReport::new(HealthStatus::Critical, Some(reason));
    record
}

/// Drives plugins through the lifecycle state machine.
pub struct LifecycleManager {
    store: InstallationStore,
    records: RwLock<BTreeMap<String, InstallationRecord>>,
    locks: NameLocks,
    states: StateTracker,
    validator: ManifestValidator,
    policy: TrustPolicy,
    fetcher: Arc<dyn ArtifactFetcher>,
    monitor: Arc<dyn HealthMonitor>,
    sandbox: Arc<dyn Sandbox>,
    steps: StepRunner,
    options: LifecycleOptions,
}

impl LifecycleManager {
    pub fn new(
        store: InstallationStore,
        policy: TrustPolicy,
        options: LifecycleOptions,
        fetcher: Arc<dyn ArtifactFetcher>,
        monitor: Arc<dyn HealthMonitor>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self {
            store,
            records: RwLock::new(BTreeMap::new()),
            locks: NameLocks::new(),
            states: StateTracker::new(),
            validator: ManifestValidator::new(),
            steps: StepRunner::new(options.step_timeout),
            policy,
            fetcher,
            monitor,
            sandbox,
            options,
        }
    }

    pub fn with_validator(mut self, validator: ManifestValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn locks(&self) -> &NameLocks {
        &self.locks
    }

    /// Current in-flight state of `name`, if an operation is running.
    pub fn transient_state(&self, name: &str) -> Option<LifecycleState> {
        self.states.current(name)
    }

    /// Load persisted records and flag any left mid-transition by a crash.
    /// Returns the names that were flagged.
    pub async fn load(&self) -> Result<Vec<String>, TallyError> {
        let mut flagged = Vec::new();
        for mut record in self.store.list_unsettled().await? {
            // Records are only written once files are in place.
            let restored = LifecycleState::Installed;
            warn!(
                plugin = %record.name,
                state = %record.state,
                restored = %restored,
                "found interrupted lifecycle transition"
            );
            record.state = restored;
            record.needs_attention = true;
            record.health = HealthReport::new(
                HealthStatus::Unknown,
                Some("interrupted lifecycle transition; inspect installed files".to_string()),
            );
            self.store.upsert(&record).await?;
            flagged.push(record.name);
        }

        let all = self.store.list().await?;
        let count = all.len();
        *self.records.write().await = all.into_iter().map(|r| (r.name.clone(), r)).collect();
        info!(installed = count, flagged = flagged.len(), "installation records loaded");
        Ok(flagged)
    }

    pub async fn list(&self) -> Vec<InstallationRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<InstallationRecord> {
        self.records.read().await.get(name).cloned()
    }

    /// Installed plugin versions, for dependency resolution.
    pub async fn installed_versions(&self) -> BTreeMap<String, Version> {
        self.records
            .read()
            .await
            .values()
            .map(|r| (r.name.clone(), r.version.clone()))
            .collect()
    }

    async fn put_record(&self, record: &InstallationRecord) -> Result<(), TallyError> {
        self.store.upsert(record).await?;
        self.records
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn drop_record(&self, name: &str) -> Result<(), TallyError> {
        self.store.remove(name).await?;
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        name: &str,
        op: impl std::future::Future<Output = Result<T, TallyError>>,
    ) -> Result<T, TallyError> {
        let duration = self.options.transition_timeout;
        match tokio::time::timeout(duration, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(plugin = name, ?duration, "lifecycle transition timed out");
                self.states.roll_back(name);
                Err(TallyError::Timeout { duration })
            }
        }
    }

    // --- install ---

    /// Install `manifest`. Fails if a version of the plugin is already installed.
    pub async fn install(
        &self,
        manifest: &PluginManifest,
        options: InstallOptions,
    ) -> Result<InstallOutcome, TallyError> {
        let name = manifest.name.as_str();
        let _guard = self.locks.acquire(name).await;
        if let Some(existing) = self.get(name).await {
            return Err(TallyError::FailedPrecondition {
                message: format!(
                    "`{name}` {} is already installed; update it instead",
                    existing.version
                ),
                dependents: Vec::new(),
            });
        }

        let result = self.with_timeout(name, self.run_install(manifest, options)).await;
        if let Err(e) = &result {
            self.states.roll_back(name);
            if matches!(e, TallyError::Timeout { .. }) {
                self.abandon_install(manifest).await;
            }
        }
        result
    }

    async fn run_install(
        &self,
        manifest: &PluginManifest,
        options: InstallOptions,
    ) -> Result<InstallOutcome, TallyError> {
        let name = manifest.name.as_str();
        self.states.begin(name, LifecycleState::Discovered);
        info!(plugin = %manifest.id(), "installing plugin");

        let prepared = self.prepare(manifest, options, true).await?;
        self.states.advance(name, LifecycleState::Installing)?;
        let record = self.materialize(manifest, prepared, None).await?;
        let health = self.record_health(&record).await?;
        self.states.advance(name, LifecycleState::Installed)?;
        self.states.finish(name);

        info!(plugin = %manifest.id(), health = %health.status, "plugin installed");
        let record = self.get(name).await.unwrap_or(record);
        Ok(InstallOutcome { record, health })
    }

    /// Everything before the install root is touched: validation, sandbox and
    /// host checks, pre-install steps, download and verification.
    async fn prepare(
        &self,
        manifest: &PluginManifest,
        options: InstallOptions,
        track: bool,
    ) -> Result<Prepared, TallyError> {
        let name = manifest.name.as_str();

        self.validator
            .validate(manifest)
            .ensure_installable(name, options.confirm_warnings)?;
        if track {
            self.states.advance(name, LifecycleState::Validated)?;
        }

        if manifest.security.sandbox_required && !self.sandbox.is_available() {
            return Err(TallyError::PermissionDenied(format!(
                "`{name}` requires a sandbox and `{}` is not available",
                self.sandbox.name()
            )));
        }
        check_system(manifest)?;
        self.steps
            .run_all(name, Phase::PreInstall, &manifest.installation.pre_install, None)
            .await?;

        let method = manifest.install_method().ok_or_else(|| {
            TallyError::InvalidArgument(format!(
                "unknown installation method `{}`",
                manifest.installation.method
            ))
        })?;
        let artifact = self
            .fetcher
            .fetch(name, &manifest.installation.download_url)
            .await?;
        debug!(plugin = name, bytes = artifact.len(), "artifact downloaded");

        let trust_level = verify(manifest, &artifact, &self.policy, options.verify_context())
            .into_result(name)?;
        if track {
            self.states.advance(name, LifecycleState::Verified)?;
        }

        Ok(Prepared {
            artifact,
            method,
            trust_level,
        })
    }

    /// Extract, configure, register and run post-install steps.
    ///
    /// On failure the new files are removed and the record is either deleted
    /// or, when `previous` is given, restored.
    async fn materialize(
        &self,
        manifest: &PluginManifest,
        prepared: Prepared,
        previous: Option<&InstallationRecord>,
    ) -> Result<InstallationRecord, TallyError> {
        let name = manifest.name.clone();
        let root = self.options.install_root.clone();
        let owned = manifest.clone();
        let Prepared {
            artifact,
            method,
            trust_level,
        } = prepared;

        let extracted = tokio::task::spawn_blocking(move || {
            extract::install_artifact(&root, &owned, method, &artifact)
        })
        .await
        .map_err(|e| TallyError::Internal(format!("extraction task failed: {e}")))??;

        match self
            .register(manifest, &extracted, method, trust_level, previous)
            .await
        {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(plugin = %name, error = %e, "install failed after extraction, cleaning up");
                self.cleanup(&name, &extracted.install_dir, previous).await;
                Err(e)
            }
        }
    }

    async fn register(
        &self,
        manifest: &PluginManifest,
        extracted: &Extracted,
        method: InstallMethod,
        trust_level: TrustLevel,
        previous: Option<&InstallationRecord>,
    ) -> Result<InstallationRecord, TallyError> {
        let name = manifest.name.as_str();
        let mut files = extracted.files.clone();
        if let Some(config) = extract::apply_default_config(&extracted.install_dir, manifest)? {
            files.push(config);
        }

        let version = manifest
            .semver()
            .map_err(|e| TallyError::InvalidArgument(format!("invalid version: {e}")))?;
        let manifest_json = serde_json::to_string(manifest)
            .map_err(|e| TallyError::Internal(format!("cannot encode manifest: {e}")))?;
        let now = Utc::now();
        let record = InstallationRecord {
            name: name.to_string(),
            version,
            installed_at: previous.map_or(now, |p| p.installed_at),
            updated_at: now,
            method,
            install_dir: extracted.install_dir.clone(),
            files,
            entry_point: extracted.entry_point.clone(),
            state: LifecycleState::Installed,
            trust_level,
            dependencies: manifest.installed_dependencies(),
            health: HealthReport::unknown(),
            needs_attention: false,
            manifest_json,
        };
        self.put_record(&record).await?;

        self.steps
            .run_all(
                name,
                Phase::PostInstall,
                &manifest.installation.post_install,
                Some(&extracted.install_dir),
            )
            .await?;
        Ok(record)
    }

    async fn cleanup(&self, name: &str, dir: &Path, previous: Option<&InstallationRecord>) {
        if let Err(e) = extract::remove_version_dir(dir) {
            let dir = dir.display();
            warn!(plugin = name, %dir, error = %e, "failed to remove partial install");
        }
        let restored = match previous {
            Some(record) => self.put_record(record).await,
            None => self.drop_record(name).await,
        };
        if let Err(e) = restored {
            warn!(plugin = name, error = %e, "failed to restore installation record");
        }
    }

    /// After a timed-out install, remove whatever the attempt left behind.
    /// Nothing was installed before the attempt, so any record is its own.
    async fn abandon_install(&self, manifest: &PluginManifest) {
        let dir = self.new_version_dir(manifest);
        warn!(plugin = %manifest.name, dir = %dir.display(), "discarding timed-out install");
        let registered = self.get(&manifest.name).await.is_some();
        if dir.exists() || registered {
            self.cleanup(&manifest.name, &dir, None).await;
        }
    }

    /// After a timed-out update, put `current` back if its files survived,
    /// otherwise keep it flagged for attention.
    async fn abandon_update(&self, manifest: &PluginManifest, current: &InstallationRecord) {
        let name = manifest.name.as_str();
        let dir = self.new_version_dir(manifest);
        if dir != current.install_dir && dir.exists() {
            if let Err(e) = extract::remove_version_dir(&dir) {
                let dir = dir.display();
                warn!(plugin = name, %dir, error = %e, "failed to remove partial update");
            }
        }
        let restored = if current.install_dir.exists() {
            current.clone()
        } else {
            stranded(current, format!("update to {} timed out", manifest.version))
        };
        if let Err(e) = self.put_record(&restored).await {
            warn!(plugin = name, error = %e, "failed to restore installation record");
        }
    }

    fn new_version_dir(&self, manifest: &PluginManifest) -> PathBuf {
        extract::version_dir(&self.options.install_root, &manifest.name, &manifest.version)
    }

    // --- update ---

    /// Move an installed plugin to the version described by `manifest`.
    pub async fn update(
        &self,
        manifest: &PluginManifest,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome, TallyError> {
        let name = manifest.name.as_str();
        let _guard = self.locks.acquire(name).await;
        let current = self
            .get(name)
            .await
            .ok_or_else(|| TallyError::plugin_not_found(name))?;
        let target = manifest
            .semver()
            .map_err(|e| TallyError::InvalidArgument(format!("invalid version: {e}")))?;

        let kind = classify_update(&current.version, &target);
        let refusal = match kind {
            UpdateKind::NotNewer => Some(format!(
                "`{name}` {} is not older than {target}",
                current.version
            )),
            UpdateKind::Minor if !options.acknowledge => Some(format!(
                "minor update {} -> {target} requires acknowledgment",
                current.version
            )),
            UpdateKind::Major if !options.force => Some(format!(
                "major update {} -> {target} requires force",
                current.version
            )),
            _ => None,
        };
        if let Some(message) = refusal {
            return Err(TallyError::FailedPrecondition {
                message,
                dependents: Vec::new(),
            });
        }

        self.states.begin(name, LifecycleState::Installed);
        self.states.advance(name, LifecycleState::Updating)?;
        self.store.set_state(name, LifecycleState::Updating).await?;
        info!(plugin = name, from = %current.version, to = %target, %kind, "updating plugin");

        let result = self
            .with_timeout(name, self.run_update(manifest, &current, kind, options))
            .await;
        match result {
            Ok((record, health)) => {
                self.states.advance(name, LifecycleState::Installed)?;
                self.states.finish(name);
                info!(plugin = name, version = %record.version, "plugin updated");
                Ok(UpdateOutcome {
                    from: current.version,
                    to: target,
                    kind,
                    record,
                    health,
                })
            }
            Err(e) => {
                self.states.roll_back(name);
                if matches!(e, TallyError::Timeout { .. }) {
                    self.abandon_update(manifest, &current).await;
                }
                let restored = self.store.set_state(name, LifecycleState::Installed).await;
                if let Err(store_err) = restored {
                    warn!(plugin = name, error = %store_err, "failed to restore record state");
                }
                Err(e)
            }
        }
    }

    async fn run_update(
        &self,
        manifest: &PluginManifest,
        current: &InstallationRecord,
        kind: UpdateKind,
        options: UpdateOptions,
    ) -> Result<(InstallationRecord, HealthReport), TallyError> {
        let name = manifest.name.as_str();
        let prepared = self.prepare(manifest, options.install, false).await?;

        if kind == UpdateKind::Major {
            return self.update_side_by_side(manifest, current, prepared).await;
        }

        // Patch and minor updates replace the old files first.
        if let Err(e) = extract::remove_version_dir(&current.install_dir) {
            return Err(TallyError::Installation {
                plugin: name.to_string(),
                message: "cannot remove previous version".to_string(),
                source: Some(Box::new(e)),
            });
        }
        match self.materialize(manifest, prepared, Some(current)).await {
            Ok(record) => {
                let health = self.record_health(&record).await?;
                Ok((self.get(name).await.unwrap_or(record), health))
            }
            Err(e) => {
                // The previous files are gone; keep the record but flag it.
                let reason = format!("update to {} failed: {e}", manifest.version);
                let flagged = stranded(current, reason);
                if let Err(store_err) = self.put_record(&flagged).await {
                    warn!(plugin = name, error = %store_err, "failed to flag stranded record");
                }
                Err(e)
            }
        }
    }

    async fn update_side_by_side(
        &self,
        manifest: &PluginManifest,
        current: &InstallationRecord,
        prepared: Prepared,
    ) -> Result<(InstallationRecord, HealthReport), TallyError> {
        let name = manifest.name.as_str();
        let record = self.materialize(manifest, prepared, Some(current)).await?;
        let health = self.run_monitor(&record).await;

        if matches!(health.status, HealthStatus::Healthy | HealthStatus::Warning) {
            if let Err(e) = extract::remove_version_dir(&current.install_dir) {
                warn!(plugin = name, error = %e, "failed to remove previous version");
            }
            self.persist_health(name, &health).await?;
            return Ok((self.get(name).await.unwrap_or(record), health));
        }

        warn!(plugin = name, status = %health.status, "new version unhealthy, rolling back");
        self.cleanup(name, &record.install_dir, Some(current)).await;
        let detail = health
            .message
            .clone()
            .unwrap_or_else(|| health.status.to_string());
        Err(TallyError::Runtime {
            plugin: name.to_string(),
            message: format!(
                "version {} failed its health check ({detail}); kept {}",
                manifest.version, current.version
            ),
        })
    }

    // --- remove ---

    /// Installed plugins that transitively require `name`, nearest first.
    async fn dependents_of(&self, name: &str) -> Vec<String> {
        let records = self.records.read().await;
        let mut found: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(target) = frontier.pop() {
            for record in records.values() {
                if record.required_dependencies().any(|d| d == target)
                    && seen.insert(record.name.clone())
                {
                    found.push(record.name.clone());
                    frontier.push(record.name.clone());
                }
            }
        }
        found.retain(|n| n != name);
        found
    }

    /// Remove `name`. With `cascade`, plugins that depend on it are removed
    /// first; without it, any dependent is a failed precondition.
    pub async fn remove(&self, name: &str, cascade: bool) -> Result<RemoveOutcome, TallyError> {
        if self.get(name).await.is_none() {
            return Err(TallyError::plugin_not_found(name));
        }

        // Lock the whole set, then confirm it did not change while waiting.
        let (guard, dependents) = loop {
            let dependents = self.dependents_of(name).await;
            let guard = self
                .locks
                .acquire_many(std::iter::once(name).chain(dependents.iter().map(String::as_str)))
                .await;
            if self.dependents_of(name).await == dependents {
                break (guard, dependents);
            }
            debug!(plugin = name, "dependents changed while locking, retrying");
        };

        if self.get(name).await.is_none() {
            return Err(TallyError::plugin_not_found(name));
        }
        if !dependents.is_empty() && !cascade {
            let mut listed = dependents.clone();
            listed.sort();
            return Err(TallyError::FailedPrecondition {
                message: format!(
                    "`{name}` is required by {}; remove them first or use cascade",
                    listed.join(", ")
                ),
                dependents: listed,
            });
        }

        let order = self.removal_order(name, &dependents).await;
        let mut removed = Vec::new();
        for plugin in &order {
            self.with_timeout(plugin, self.remove_one(plugin)).await?;
            removed.push(plugin.clone());
        }
        drop(guard);
        info!(plugin = name, removed = removed.len(), "removal complete");
        Ok(RemoveOutcome { removed })
    }

    /// Dependents before their dependencies.
    async fn removal_order(&self, name: &str, dependents: &[String]) -> Vec<String> {
        let records = self.records.read().await;
        let mut remaining: BTreeSet<String> = dependents.iter().cloned().collect();
        remaining.insert(name.to_string());

        let mut order = Vec::new();
        while !remaining.is_empty() {
            // Removable now: nothing left in the set depends on it.
            let ready: Vec<String> = remaining
                .iter()
                .filter(|candidate| {
                    !remaining.iter().any(|other| {
                        records
                            .get(other)
                            .is_some_and(|r| {
                                r.required_dependencies().any(|d| d == candidate.as_str())
                            })
                    })
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                // Dependency cycle among installed plugins; fall back to name order.
                order.extend(remaining.iter().cloned());
                break;
            }
            for n in ready {
                remaining.remove(&n);
                order.push(n);
            }
        }
        order
    }

    async fn remove_one(&self, name: &str) -> Result<(), TallyError> {
        let Some(record) = self.get(name).await else {
            return Ok(());
        };
        self.states.begin(name, LifecycleState::Installed);
        self.states.advance(name, LifecycleState::Removing)?;
        self.store.set_state(name, LifecycleState::Removing).await?;

        let dir = record.install_dir.clone();
        let removed = tokio::task::spawn_blocking(move || extract::remove_version_dir(&dir))
            .await
            .map_err(|e| TallyError::Internal(format!("removal task failed: {e}")))?;
        if let Err(e) = removed {
            self.states.roll_back(name);
            self.store.set_state(name, LifecycleState::Installed).await?;
            return Err(TallyError::Installation {
                plugin: name.to_string(),
                message: format!("cannot remove {}", record.install_dir.display()),
                source: Some(Box::new(e)),
            });
        }

        self.drop_record(name).await?;
        self.states.advance(name, LifecycleState::Removed)?;
        self.states.finish(name);
        info!(plugin = name, version = %record.version, "plugin removed");
        Ok(())
    }

    // --- health ---

    async fn run_monitor(&self, record: &InstallationRecord) -> HealthReport {
        match self.monitor.check(record).await {
            Ok(report) => report,
            Err(e) => {
                let monitor = self.monitor.name();
                warn!(plugin = %record.name, monitor, error = %e, "health check errored");
                HealthReport::new(HealthStatus::Unknown, Some(e.to_string()))
            }
        }
    }

    async fn persist_health(&self, name: &str, report: &HealthReport) -> Result<(), TallyError> {
        let needs_attention = report.status == HealthStatus::Critical;
        if needs_attention {
            let message = report.message.as_deref();
            warn!(plugin = name, ?message, "plugin is unhealthy, flagged for attention");
        }
        self.store.update_health(name, report, needs_attention).await?;
        if let Some(record) = self.records.write().await.get_mut(name) {
            record.health = report.clone();
            record.needs_attention = needs_attention;
        }
        Ok(())
    }

    async fn record_health(&self, record: &InstallationRecord) -> Result<HealthReport, TallyError> {
        let report = self.run_monitor(record).await;
        self.persist_health(&record.name, &report).await?;
        Ok(report)
    }

    /// Run the health monitor for one installed plugin and store the result.
    pub async fn check_health(&self, name: &str) -> Result<HealthReport, TallyError> {
        let record = self
            .get(name)
            .await
            .ok_or_else(|| TallyError::plugin_not_found(name))?;
        self.record_health(&record).await
    }

    /// Check every installed plugin. Plugins busy in another operation are skipped.
    pub async fn check_all(&self) -> Result<Vec<(String, HealthReport)>, TallyError> {
        let mut reports = Vec::new();
        for record in self.list().await {
            if self.locks.is_locked(&record.name) {
                debug!(plugin = %record.name, "skipping health check, operation in progress");
                continue;
            }
            let report = self.record_health(&record).await?;
            reports.push((record.name, report));
        }
        Ok(reports)
    }
}
