// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Tally plugin registry.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::TrustLevel;

/// Top-level Tally configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TallyConfig {
    /// Filesystem locations and process-wide settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Discovery sources and fan-out settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Installation trust policy.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Install/update/remove and health-check settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// RPC gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Filesystem locations and process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Root directory for registry state (git checkouts, staging).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory plugins are installed into. Defaults to `<data_dir>/plugins`.
    #[serde(default)]
    pub install_dir: Option<String>,

    /// Path to the SQLite database holding installation records.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Version of the cost-source RPC spec this host speaks. Manifests whose
    /// `[min_spec_version, max_spec_version]` excludes it are rejected.
    #[serde(default)]
    pub host_spec_version: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            install_dir: None,
            database_path: default_database_path(),
            log_level: default_log_level(),
            host_spec_version: None,
        }
    }
}

impl RegistryConfig {
    /// Resolved plugin installation directory.
    pub fn install_root(&self) -> PathBuf {
        self.install_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.data_dir).join("plugins"))
    }

    /// Directory holding version-control checkouts for git sources.
    pub fn checkout_root(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("checkouts")
    }
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("tally"))
        .unwrap_or_else(|| PathBuf::from(".tally"))
        .to_string_lossy()
        .into_owned()
}

fn default_database_path() -> String {
    PathBuf::from(default_data_dir())
        .join("tally.db")
        .to_string_lossy()
        .into_owned()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Discovery engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Per-source scan timeout in seconds.
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient network failures (registry and url sources).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff between retries, doubled on each attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Cache TTL for sources that do not set their own.
    #[serde(default = "default_cache_ttl")]
    pub default_cache_ttl_secs: u64,

    /// Configured sources, in tie-break order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_discovery_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            default_cache_ttl_secs: default_cache_ttl(),
            sources: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_discovery_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_manifest_filename() -> String {
    "plugin.toml".to_string()
}

fn default_recursive() -> bool {
    true
}

fn default_page_size() -> u32 {
    100
}

fn default_branch() -> String {
    "main".to_string()
}

/// A discovery source, tagged by `type` in TOML:
///
/// ```toml
/// [[discovery.sources]]
/// type = "filesystem"
/// name = "local"
/// root = "/opt/tally/plugins"
/// priority = 10
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Filesystem(FilesystemSourceConfig),
    Registry(RegistrySourceConfig),
    Url(UrlSourceConfig),
    Git(GitSourceConfig),
}

impl SourceConfig {
    /// Unique source name used in logs and failure reports.
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Filesystem(c) => &c.name,
            SourceConfig::Registry(c) => &c.name,
            SourceConfig::Url(c) => &c.name,
            SourceConfig::Git(c) => &c.name,
        }
    }

    /// Merge priority; a higher value wins.
    pub fn priority(&self) -> i32 {
        match self {
            SourceConfig::Filesystem(c) => c.priority,
            SourceConfig::Registry(c) => c.priority,
            SourceConfig::Url(c) => c.priority,
            SourceConfig::Git(c) => c.priority,
        }
    }

    /// Source-specific cache TTL, if set.
    pub fn cache_ttl_secs(&self) -> Option<u64> {
        match self {
            SourceConfig::Filesystem(c) => c.cache_ttl_secs,
            SourceConfig::Registry(c) => c.cache_ttl_secs,
            SourceConfig::Url(c) => c.cache_ttl_secs,
            SourceConfig::Git(c) => c.cache_ttl_secs,
        }
    }

    /// Kind label (`filesystem`, `registry`, `url`, `git`).
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Filesystem(_) => "filesystem",
            SourceConfig::Registry(_) => "registry",
            SourceConfig::Url(_) => "url",
            SourceConfig::Git(_) => "git",
        }
    }
}

/// Scans a local directory tree for manifest files.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemSourceConfig {
    pub name: String,
    pub root: String,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    #[serde(default = "default_manifest_filename")]
    pub manifest_filename: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

/// Queries a remote plugin registry over HTTP.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySourceConfig {
    pub name: String,
    pub base_url: String,
    /// Sent as a bearer token. Never logged.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout. Defaults to `discovery.timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

/// Fetches an explicit list of manifest documents.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UrlSourceConfig {
    pub name: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

/// Scans a shallow checkout of a git repository.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GitSourceConfig {
    pub name: String,
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the checkout to scan. Defaults to the checkout root.
    #[serde(default)]
    pub subpath: Option<String>,
    #[serde(default = "default_manifest_filename")]
    pub manifest_filename: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Access token for HTTPS remotes. Never logged.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

/// Installation trust policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Minimum declared trust level accepted for installation.
    #[serde(default = "default_min_trust_level")]
    pub min_trust_level: TrustLevel,

    /// Hex-encoded Ed25519 public keys that certificate chains must end at.
    #[serde(default)]
    pub trust_anchors: Vec<String>,

    /// Reject manifests that carry no signature.
    #[serde(default)]
    pub require_signature: bool,

    /// Allow interactive installs to lower the minimum trust level.
    #[serde(default = "default_allow_interactive_override")]
    pub allow_interactive_override: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_trust_level: default_min_trust_level(),
            trust_anchors: Vec::new(),
            require_signature: false,
            allow_interactive_override: default_allow_interactive_override(),
        }
    }
}

fn default_min_trust_level() -> TrustLevel {
    TrustLevel::Community
}

fn default_allow_interactive_override() -> bool {
    true
}

/// Install/update/remove and health-check settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Upper bound for any single install/update/remove.
    #[serde(default = "default_transition_timeout")]
    pub transition_timeout_secs: u64,

    /// Interval between periodic health checks. `0` disables them.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Timeout for each `run` install step.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Whether a sandboxing mechanism is available on this host.
    #[serde(default)]
    pub sandbox_available: bool,

    /// Name of the sandboxing mechanism, for logs.
    #[serde(default = "default_sandbox_name")]
    pub sandbox_name: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            transition_timeout_secs: default_transition_timeout(),
            health_interval_secs: default_health_interval(),
            step_timeout_secs: default_step_timeout(),
            sandbox_available: false,
            sandbox_name: default_sandbox_name(),
        }
    }
}

fn default_transition_timeout() -> u64 {
    600
}

fn default_health_interval() -> u64 {
    300
}

fn default_step_timeout() -> u64 {
    60
}

fn default_sandbox_name() -> String {
    "none".to_string()
}

/// RPC gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_gateway_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bearer token required on `/v1/*`. `None` disables auth.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            bearer_token: None,
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    7421
}
