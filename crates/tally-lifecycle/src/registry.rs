// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The registry surface: discovery plus lifecycle behind one handle.

use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use serde::Serialize;
use serde_json::Value;
use tally_config::TallyConfig;
use tally_core::{HealthReport, InstallationRecord, TallyError};
use tally_discovery::{DiscoveryEngine, DiscoveryOutcome, PluginIndex};
use tally_plugin::{
    ManifestFormat, PluginManifest, ValidationResult, VersionConstraint, parse_document,
    resolve_graph, resolve_version,
};
use tally_storage::InstallationStore;
use tally_verify::TrustPolicy;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fetch::DefaultFetcher;
use crate::health::{FileHealthMonitor, spawn_health_loop};
use crate::manager::{
    InstallOptions, InstallOutcome, LifecycleManager, LifecycleOptions, RemoveOutcome,
    UpdateOptions, UpdateOutcome,
};
use crate::sandbox::ConfiguredSandbox;

/// Result of installing a plugin together with its dependencies.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    /// Every plugin installed by this call, dependencies first.
    pub installed: Vec<InstallOutcome>,
    /// Dependencies that were already present at a satisfying version.
    pub satisfied: Vec<(String, String)>,
    pub warnings: Vec<String>,
}

/// Handle over discovery and the lifecycle manager.
pub struct Registry {
    discovery: DiscoveryEngine,
    lifecycle: Arc<LifecycleManager>,
}

impl Registry {
    pub fn new(discovery: DiscoveryEngine, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            discovery,
            lifecycle,
        }
    }

    /// Build every component from configuration and load installation records.
    pub async fn open(config: &TallyConfig) -> Result<Self, TallyError> {
        let discovery = DiscoveryEngine::from_config(&config.discovery, &config.registry)?;
        let store = InstallationStore::open(&config.registry.database_path).await?;

        let security = &config.security;
        let policy = TrustPolicy::from_hex_anchors(
            security.min_trust_level,
            &security.trust_anchors,
            security.require_signature,
            security.allow_interactive_override,
        )?;

        let lifecycle = &config.lifecycle;
        let options = LifecycleOptions {
            install_root: config.registry.install_root(),
            transition_timeout: Duration::from_secs(lifecycle.transition_timeout_secs),
            step_timeout: Duration::from_secs(lifecycle.step_timeout_secs),
        };
        let manager = LifecycleManager::new(
            store,
            policy,
            options,
            Arc::new(DefaultFetcher::new(Duration::from_secs(
                lifecycle.transition_timeout_secs,
            ))?),
            Arc::new(FileHealthMonitor),
            Arc::new(ConfiguredSandbox::from_config(lifecycle)),
        )
        .with_validator(discovery.validator().clone());

        let flagged = manager.load().await?;
        if !flagged.is_empty() {
            info!(plugins = ?flagged, "flagged interrupted installations for attention");
        }
        Ok(Self::new(discovery, Arc::new(manager)))
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn discovery(&self) -> &DiscoveryEngine {
        &self.discovery
    }

    /// Start periodic health checks.
    pub fn spawn_health_checks(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        spawn_health_loop(Arc::clone(&self.lifecycle), interval, cancel)
    }

    /// Scan every configured source, or serve the cached index while fresh.
    pub async fn discover_plugins(
        &self,
        cancel: &CancellationToken,
        force_refresh: bool,
    ) -> Result<DiscoveryOutcome, TallyError> {
        self.discovery.discover(cancel, force_refresh).await
    }

    async fn index(&self) -> Result<Arc<PluginIndex>, TallyError> {
        let outcome = self
            .discovery
            .discover(&CancellationToken::new(), false)
            .await?;
        Ok(outcome.index)
    }

    /// Manifest for `name`: a specific version, or the latest one.
    pub async fn get_plugin_manifest(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<PluginManifest, TallyError> {
        let version = version
            .map(|v| {
                Version::parse(v)
                    .map_err(|e| TallyError::InvalidArgument(format!("invalid version `{v}`: {e}")))
            })
            .transpose()?;
        let index = self.index().await?;
        if index.get(name).is_none() {
            return Err(TallyError::plugin_not_found(name));
        }
        index
            .get_version(name, version.as_ref())
            .cloned()
            .ok_or_else(|| TallyError::NotFound {
                kind: "plugin version".to_string(),
                name: format!("{name}@{}", version.map(|v| v.to_string()).unwrap_or_default()),
            })
    }

    /// Latest manifests matching `query`, optionally limited to one provider.
    pub async fn search_plugins(
        &self,
        query: &str,
        provider: Option<&str>,
    ) -> Result<Vec<PluginManifest>, TallyError> {
        let index = self.index().await?;
        Ok(index
            .search(query)
            .into_iter()
            .filter(|m| {
                provider.is_none_or(|p| m.spec.providers.iter().any(|q| q.eq_ignore_ascii_case(p)))
            })
            .cloned()
            .collect())
    }

    /// Validate a manifest document without installing anything.
    pub fn validate_plugin(&self, document: &Value) -> ValidationResult {
        self.discovery.validator().validate_document(document)
    }

    /// Parse manifest text (JSON or TOML) and validate it.
    pub fn validate_plugin_text(&self, content: &str) -> Result<ValidationResult, TallyError> {
        let document = parse_document(content, ManifestFormat::detect(content))?;
        Ok(self.validate_plugin(&document))
    }

    /// Pick the manifest matching `constraint` (or the latest) from the index.
    fn select(
        index: &PluginIndex,
        name: &str,
        constraint: Option<&str>,
    ) -> Result<PluginManifest, TallyError> {
        let entry = index
            .get(name)
            .ok_or_else(|| TallyError::plugin_not_found(name))?;
        let Some(raw) = constraint else {
            return entry
                .latest()
                .cloned()
                .ok_or_else(|| TallyError::plugin_not_found(name));
        };
        let parsed = VersionConstraint::parse(raw)
            .map_err(|e| TallyError::InvalidArgument(e.to_string()))?;
        let available = entry.available_versions();
        let chosen = resolve_version(&parsed, &available).ok_or_else(|| TallyError::Resolution {
            message: format!("no version of `{name}` satisfies `{raw}`"),
        })?;
        index
            .get_version(name, Some(chosen))
            .cloned()
            .ok_or_else(|| TallyError::plugin_not_found(name))
    }

    /// Install `name` and any missing dependencies, leaves first.
    pub async fn install_plugin(
        &self,
        name: &str,
        constraint: Option<&str>,
        options: InstallOptions,
    ) -> Result<InstallReport, TallyError> {
        let index = self.index().await?;
        let root = Self::select(&index, name, constraint)?;
        let installed = self.lifecycle.installed_versions().await;
        if installed.contains_key(name) {
            return Err(TallyError::FailedPrecondition {
                message: format!("`{name}` is already installed; update it instead"),
                dependents: Vec::new(),
            });
        }

        let plan = resolve_graph(&root, index.as_ref(), &installed)?;
        info!(plugin = %root.id(), plan = ?plan.names(), "install plan resolved");

        let mut report = InstallReport {
            installed: Vec::with_capacity(plan.steps.len()),
            satisfied: plan.satisfied,
            warnings: plan.warnings,
        };
        for step in &plan.steps {
            // A concurrent caller may have installed a shared dependency.
            if step.name != root.name && self.lifecycle.get(&step.name).await.is_some() {
                continue;
            }
            match self.lifecycle.install(step, options).await {
                Ok(outcome) => report.installed.push(outcome),
                Err(e) => {
                    self.roll_back_plan(&report.installed).await;
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    /// Remove what a failed plan already installed, newest first.
    async fn roll_back_plan(&self, installed: &[InstallOutcome]) {
        for outcome in installed.iter().rev() {
            let name = outcome.record.name.as_str();
            match self.lifecycle.remove(name, false).await {
                Ok(_) => info!(plugin = name, "rolled back install plan step"),
                // Something else came to depend on it meanwhile.
                Err(e) => warn!(plugin = name, error = %e, "cannot roll back install plan step"),
            }
        }
    }

    /// Update `name` to `version`, or to the newest discovered version.
    pub async fn update_plugin(
        &self,
        name: &str,
        version: Option<&str>,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome, TallyError> {
        let current = self
            .lifecycle
            .get(name)
            .await
            .ok_or_else(|| TallyError::plugin_not_found(name))?;
        let target = match version {
            Some(v) => self.get_plugin_manifest(name, Some(v)).await?,
            None => {
                let latest = self.get_plugin_manifest(name, None).await?;
                if latest.semver().is_ok_and(|v| v <= current.version) {
                    return Err(TallyError::FailedPrecondition {
                        message: format!("`{name}` {} is up to date", current.version),
                        dependents: Vec::new(),
                    });
                }
                latest
            }
        };
        self.lifecycle.update(&target, options).await
    }

    pub async fn remove_plugin(
        &self,
        name: &str,
        cascade: bool,
    ) -> Result<RemoveOutcome, TallyError> {
        self.lifecycle.remove(name, cascade).await
    }

    pub async fn list_installed_plugins(&self) -> Vec<InstallationRecord> {
        self.lifecycle.list().await
    }

    pub async fn check_plugin_health(&self, name: &str) -> Result<HealthReport, TallyError> {
        self.lifecycle.check_health(name).await
    }
}
