// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concurrent discovery across all configured sources, with merge and cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tally_config::{DiscoveryConfig, RegistryConfig};
use tally_core::TallyError;
use tally_plugin::{Finding, ManifestValidator, PluginManifest};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::index::{IndexEntry, PluginIndex};
use crate::source::{DiscoverySource, ManifestSource, ScanContext, ScanOutput};

/// Why a source contributed nothing this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub kind: FailureKind,
    pub message: String,
}

/// A manifest dropped because validation found critical defects.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedManifest {
    pub source: String,
    pub origin: String,
    /// Declared name, when the document had one.
    pub name: Option<String>,
    pub findings: Vec<Finding>,
}

/// Result of one discovery cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutcome {
    pub index: Arc<PluginIndex>,
    pub failures: Vec<SourceFailure>,
    pub rejected: Vec<RejectedManifest>,
    /// Non-fatal per-source problems, prefixed with the source name.
    pub warnings: Vec<String>,
    pub from_cache: bool,
    pub discovered_at: DateTime<Utc>,
}

struct SourceSlot {
    source: Arc<DiscoverySource>,
    priority: i32,
    cache_ttl: Duration,
}

struct CachedIndex {
    outcome: DiscoveryOutcome,
    expires_at: Instant,
}

/// Runs every source concurrently and merges the results into a [`PluginIndex`].
pub struct DiscoveryEngine {
    slots: Vec<SourceSlot>,
    validator: ManifestValidator,
    timeout: Duration,
    default_ttl: Duration,
    cache: RwLock<Option<CachedIndex>>,
    refresh: Mutex<()>,
}

/// What one source contributed, before merging.
struct Contribution {
    order: usize,
    source: String,
    priority: i32,
    plugins: BTreeMap<String, Vec<PluginManifest>>,
}

impl DiscoveryEngine {
    pub fn new(validator: ManifestValidator, timeout: Duration, default_ttl: Duration) -> Self {
        Self {
            slots: Vec::new(),
            validator,
            timeout,
            default_ttl,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Build an engine with every source from configuration.
    pub fn from_config(
        discovery: &DiscoveryConfig,
        registry: &RegistryConfig,
    ) -> Result<Self, TallyError> {
        let mut validator = ManifestValidator::new();
        if let Some(v) = &registry.host_spec_version {
            let version = semver::Version::parse(v)
                .map_err(|e| TallyError::Config(format!("invalid host_spec_version `{v}`: {e}")))?;
            validator = validator.with_host_spec_version(version);
        }

        let default_ttl = Duration::from_secs(discovery.default_cache_ttl_secs);
        let mut engine = Self::new(validator, discovery.timeout(), default_ttl);
        let checkout_root = registry.checkout_root();
        for config in &discovery.sources {
            let source = DiscoverySource::from_config(config, discovery, &checkout_root)?;
            engine = engine.with_source(
                source,
                config.priority(),
                config.cache_ttl_secs().map(Duration::from_secs),
            );
        }
        Ok(engine)
    }

    /// Append a source. Order of addition is the tie-break order.
    pub fn with_source(
        mut self,
        source: DiscoverySource,
        priority: i32,
        cache_ttl: Option<Duration>,
    ) -> Self {
        self.slots.push(SourceSlot {
            source: Arc::new(source),
            priority,
            cache_ttl: cache_ttl.unwrap_or(self.default_ttl),
        });
        self
    }

    pub fn source_count(&self) -> usize {
        self.slots.len()
    }

    pub fn validator(&self) -> &ManifestValidator {
        &self.validator
    }

    /// Drop the cached index so the next [`discover`](Self::discover) rescans.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
        debug!("discovery cache invalidated");
    }

    /// The most recently discovered index, even if its TTL has expired.
    pub async fn current_index(&self) -> Option<Arc<PluginIndex>> {
        self.cache
            .read()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.outcome.index))
    }

    async fn cached(&self) -> Option<DiscoveryOutcome> {
        let guard = self.cache.read().await;
        let cached = guard.as_ref()?;
        if Instant::now() >= cached.expires_at {
            return None;
        }
        let mut outcome = cached.outcome.clone();
        outcome.from_cache = true;
        Some(outcome)
    }

    /// Discover plugins from every source, or serve the cached index.
    ///
    /// Per-source failures are reported in the outcome. Fails only when every
    /// source failed or `cancel` fired.
    pub async fn discover(
        &self,
        cancel: &CancellationToken,
        force_refresh: bool,
    ) -> Result<DiscoveryOutcome, TallyError> {
        if !force_refresh {
            if let Some(outcome) = self.cached().await {
                debug!(plugins = outcome.index.len(), "serving cached plugin index");
                return Ok(outcome);
            }
        }

        let _refresh = self.refresh.lock().await;
        // Another caller may have refreshed while we waited.
        if !force_refresh {
            if let Some(outcome) = self.cached().await {
                return Ok(outcome);
            }
        }

        let started = Instant::now();
        let handles: Vec<_> = self
            .slots
            .iter()
            .map(|slot| {
                let source = Arc::clone(&slot.source);
                let token = cancel.child_token();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    let ctx = ScanContext::new(token.clone(), timeout);
                    match tokio::time::timeout(timeout, source.scan(&ctx)).await {
                        Ok(result) => result,
                        Err(_) => {
                            token.cancel();
                            Err(TallyError::Timeout { duration: timeout })
                        }
                    }
                })
            })
            .collect();
        let results = join_all(handles).await;

        if cancel.is_cancelled() {
            info!("discovery cancelled");
            return Err(TallyError::Cancelled);
        }

        let mut failures = Vec::new();
        let mut rejected = Vec::new();
        let mut warnings = Vec::new();
        let mut contributions = Vec::new();
        let mut ttl: Option<Duration> = None;

        for (order, (slot, joined)) in self.slots.iter().zip(results).enumerate() {
            let name = slot.source.name().to_string();
            let result = joined.unwrap_or_else(|e| {
                Err(TallyError::Internal(format!("source task panicked: {e}")))
            });
            match result {
                Ok(output) => {
                    ttl = Some(ttl.map_or(slot.cache_ttl, |t| t.min(slot.cache_ttl)));
                    warnings.extend(output.warnings.iter().map(|w| format!("{name}: {w}")));
                    let plugins = self.accept(&name, output, &mut rejected);
                    debug!(source = %name, plugins = plugins.len(), "source scanned");
                    contributions.push(Contribution {
                        order,
                        source: name,
                        priority: slot.priority,
                        plugins,
                    });
                }
                Err(e) => {
                    let kind = match e {
                        TallyError::Timeout { .. } => FailureKind::Timeout,
                        TallyError::Cancelled => FailureKind::Cancelled,
                        _ => FailureKind::Error,
                    };
                    warn!(source = %name, error = %e, "discovery source failed");
                    failures.push(SourceFailure {
                        source: name,
                        kind,
                        message: e.to_string(),
                    });
                }
            }
        }

        if !self.slots.is_empty() && contributions.is_empty() {
            return Err(TallyError::AllSourcesFailed {
                failures: failures
                    .iter()
                    .map(|f| format!("{}: {}", f.source, f.message))
                    .collect(),
            });
        }

        let index = Arc::new(merge(contributions));
        info!(
            sources = self.slots.len(),
            plugins = index.len(),
            failures = failures.len(),
            rejected = rejected.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "discovery complete"
        );

        let outcome = DiscoveryOutcome {
            index,
            failures,
            rejected,
            warnings,
            from_cache: false,
            discovered_at: Utc::now(),
        };
        *self.cache.write().await = Some(CachedIndex {
            outcome: outcome.clone(),
            expires_at: Instant::now() + ttl.unwrap_or(self.default_ttl),
        });
        Ok(outcome)
    }

    /// Validate every candidate, grouping accepted manifests by name.
    fn accept(
        &self,
        source: &str,
        output: ScanOutput,
        rejected: &mut Vec<RejectedManifest>,
    ) -> BTreeMap<String, Vec<PluginManifest>> {
        let mut plugins: BTreeMap<String, Vec<PluginManifest>> = BTreeMap::new();
        for candidate in output.candidates {
            let document = match candidate.document {
                Ok(doc) => doc,
                Err(message) => {
                    rejected.push(RejectedManifest {
                        source: source.to_string(),
                        origin: candidate.origin,
                        name: None,
                        findings: vec![Finding {
                            severity: tally_plugin::Severity::Critical,
                            path: String::new(),
                            message,
                        }],
                    });
                    continue;
                }
            };

            let result = self.validator.validate_document(&document);
            let declared = document.get("name").and_then(|n| n.as_str()).map(String::from);
            let manifest = if result.passed {
                PluginManifest::from_value(document).ok()
            } else {
                None
            };
            match manifest {
                Some(m) => plugins.entry(m.name.clone()).or_default().push(m),
                None => {
                    let origin = candidate.origin.as_str();
                    warn!(source, origin, name = ?declared, "manifest rejected");
                    rejected.push(RejectedManifest {
                        source: source.to_string(),
                        origin: candidate.origin,
                        name: declared,
                        findings: result.findings,
                    });
                }
            }
        }
        plugins
    }
}

/// Merge per-source contributions into one index.
///
/// For each name the winner is the highest priority, then the latest
/// `updated_at` of its newest version, then the earliest configured source.
fn merge(contributions: Vec<Contribution>) -> PluginIndex {
    struct Contender {
        order: usize,
        source: String,
        priority: i32,
        updated_at: Option<DateTime<Utc>>,
        versions: Vec<PluginManifest>,
    }

    let mut by_name: BTreeMap<String, Vec<Contender>> = BTreeMap::new();
    for contribution in contributions {
        for (name, versions) in contribution.plugins {
            let entry =
                IndexEntry::new(&name, &contribution.source, contribution.priority, versions);
            let updated_at = entry.latest().and_then(PluginManifest::updated_at);
            by_name.entry(name).or_default().push(Contender {
                order: contribution.order,
                source: contribution.source.clone(),
                priority: contribution.priority,
                updated_at,
                versions: entry.versions,
            });
        }
    }

    let mut index = PluginIndex::new();
    for (name, mut contenders) in by_name {
        contenders.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.order.cmp(&b.order))
        });
        if let Some(winner) = contenders.into_iter().next() {
            index.insert(IndexEntry::new(&name, &winner.source, winner.priority, winner.versions));
        }
    }
    index
}
