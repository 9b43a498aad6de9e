// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the registry crates.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Error codes exposed on the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    FailedPrecondition,
    PermissionDenied,
    Unavailable,
    Internal,
}

/// Ordered security classification gating installation policy.
///
/// `Untrusted < Community < Verified < Official`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Untrusted,
    Community,
    Verified,
    Official,
}

impl TrustLevel {
    /// All trust levels, lowest first.
    pub const ALL: [TrustLevel; 4] = [
        TrustLevel::Untrusted,
        TrustLevel::Community,
        TrustLevel::Verified,
        TrustLevel::Official,
    ];
}

/// How a plugin artifact is laid out on disk after download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    /// The artifact is a single executable.
    Binary,
    /// The artifact is a gzip-compressed tarball.
    Archive,
}

/// Recognized permission vocabulary for plugin manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    NetworkOutbound,
    FilesystemRead,
    FilesystemWrite,
    EnvRead,
    ProcessSpawn,
    SystemAdmin,
}

impl Permission {
    /// All recognized permissions.
    pub const ALL: [Permission; 6] = [
        Permission::NetworkOutbound,
        Permission::FilesystemRead,
        Permission::FilesystemWrite,
        Permission::EnvRead,
        Permission::ProcessSpawn,
        Permission::SystemAdmin,
    ];

    /// Whether this permission cannot be granted inside a sandbox.
    pub fn requires_unrestricted(&self) -> bool {
        matches!(self, Permission::ProcessSpawn | Permission::SystemAdmin)
    }
}

/// Whether an operation was requested by a person or by automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    Interactive,
    #[default]
    Automated,
}

/// Health status reported by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Plugin is fully operational.
    Healthy,
    /// Plugin is operational but something looks off.
    Warning,
    /// Plugin is not operational.
    Critical,
    /// No check has run yet, or the check itself failed.
    #[default]
    Unknown,
}

/// A health status plus when and why it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl HealthReport {
    /// A report stamped with the current time.
    pub fn new(status: HealthStatus, message: Option<String>) -> Self {
        Self {
            status,
            checked_at: Some(Utc::now()),
            message,
        }
    }

    /// A report for a plugin that has never been checked.
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Named stages a plugin passes through from discovery to installed/removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    Validated,
    Verified,
    Installing,
    Installed,
    Updating,
    Removing,
    Removed,
}

impl LifecycleState {
    /// `Installed` is the only resting state for a plugin that is present.
    pub fn is_stable(&self) -> bool {
        matches!(self, LifecycleState::Installed)
    }

    /// States that must complete or roll back within a bounded window.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            LifecycleState::Installed | LifecycleState::Discovered | LifecycleState::Removed
        )
    }

    /// State restored when an operation in this state fails.
    pub fn rollback_target(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Validated | LifecycleState::Verified | LifecycleState::Installing => {
                Some(LifecycleState::Discovered)
            }
            LifecycleState::Updating | LifecycleState::Removing => Some(LifecycleState::Installed),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal forward or rollback transition.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        let forward = matches!(
            (self, next),
            (Discovered, Validated)
                | (Validated, Verified)
                | (Verified, Installing)
                | (Installing, Installed)
                | (Installed, Updating)
                | (Updating, Installed)
                | (Installed, Removing)
                | (Removing, Removed)
        );
        forward || self.rollback_target() == Some(next)
    }
}

/// A dependency declaration copied from the manifest into the installation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledDependency {
    pub name: String,
    pub constraint: String,
    pub optional: bool,
}

/// Persisted state of one installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub name: String,
    pub version: semver::Version,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub method: InstallMethod,
    /// Directory holding this version's files.
    pub install_dir: PathBuf,
    /// Every file written for this installation.
    pub files: Vec<PathBuf>,
    /// Executable that the orchestrator spawns.
    pub entry_point: Option<PathBuf>,
    pub state: LifecycleState,
    pub trust_level: TrustLevel,
    pub dependencies: Vec<InstalledDependency>,
    pub health: HealthReport,
    /// Set when an operator needs to look at this plugin.
    pub needs_attention: bool,
    /// The manifest this installation was made from, as JSON.
    pub manifest_json: String,
}

impl InstallationRecord {
    /// Names of plugins this installation requires (non-optional dependencies).
    pub fn required_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| !d.optional)
            .map(|d| d.name.as_str())
    }
}
