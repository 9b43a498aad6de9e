// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The closed set of discovery source kinds behind one `scan` capability.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tally_config::{DiscoveryConfig, SourceConfig};
use tally_core::TallyError;
use tokio_util::sync::CancellationToken;

use crate::filesystem::FilesystemSource;
use crate::git::GitSource;
use crate::http::RetryPolicy;
use crate::registry::RegistrySource;
use crate::url::UrlSource;

/// Cancellation and deadline handed to every scan.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

impl ScanContext {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }
}

/// A manifest document found by a source, or why it could not be read.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Path or URL the document came from.
    pub origin: String,
    pub document: Result<Value, String>,
}

/// Everything a single scan produced.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub candidates: Vec<Candidate>,
    /// Non-fatal problems (an unreadable file, one failed URL).
    pub warnings: Vec<String>,
}

/// Capability shared by every source kind.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Source name from configuration.
    fn name(&self) -> &str;

    /// Yield zero or more manifest documents. An `Err` fails this source only.
    async fn scan(&self, ctx: &ScanContext) -> Result<ScanOutput, TallyError>;
}

/// A configured discovery source.
pub enum DiscoverySource {
    Filesystem(FilesystemSource),
    Registry(RegistrySource),
    Url(UrlSource),
    Git(GitSource),
    /// Any other implementation; used by embedders and tests.
    Custom(Arc<dyn ManifestSource>),
}

impl DiscoverySource {
    /// Build a source from configuration.
    pub fn from_config(
        config: &SourceConfig,
        discovery: &DiscoveryConfig,
        checkout_root: &Path,
    ) -> Result<Self, TallyError> {
        let retry = RetryPolicy::new(discovery.max_retries, discovery.retry_backoff());
        Ok(match config {
            SourceConfig::Filesystem(c) => DiscoverySource::Filesystem(FilesystemSource::new(
                &c.name,
                &c.root,
                c.recursive,
                &c.manifest_filename,
            )),
            SourceConfig::Registry(c) => {
                let timeout = c
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| discovery.timeout());
                DiscoverySource::Registry(RegistrySource::new(c, timeout, retry)?)
            }
            SourceConfig::Url(c) => {
                DiscoverySource::Url(UrlSource::new(c, discovery.timeout(), retry)?)
            }
            SourceConfig::Git(c) => DiscoverySource::Git(GitSource::new(c, checkout_root)),
        })
    }

    fn inner(&self) -> &dyn ManifestSource {
        match self {
            DiscoverySource::Filesystem(s) => s,
            DiscoverySource::Registry(s) => s,
            DiscoverySource::Url(s) => s,
            DiscoverySource::Git(s) => s,
            DiscoverySource::Custom(s) => s.as_ref(),
        }
    }
}

#[async_trait]
impl ManifestSource for DiscoverySource {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn scan(&self, ctx: &ScanContext) -> Result<ScanOutput, TallyError> {
        self.inner().scan(ctx).await
    }
}

/// Shorthand for a source-scoped discovery error.
pub(crate) fn source_error(source: &str, message: impl Into<String>) -> TallyError {
    TallyError::Discovery {
        source_name: source.to_string(),
        message: message.into(),
    }
}
