// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tally plugin registry.

use thiserror::Error;

use crate::types::ErrorCode;

/// The primary error type used across all Tally crates.
///
/// Each variant belongs to one category of the registry's error taxonomy and
/// maps onto exactly one [`ErrorCode`] for the RPC surface.
#[derive(Debug, Error)]
pub enum TallyError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// A single discovery source failed. Never fatal for the overall discovery.
    #[error("discovery source `{source_name}` failed: {message}")]
    Discovery {
        source_name: String,
        message: String,
    },

    /// Every configured discovery source failed in the same cycle.
    #[error("discovery failed: all {} sources failed ({})", failures.len(), failures.join("; "))]
    AllSourcesFailed { failures: Vec<String> },

    /// Manifest violates schema or business rules.
    #[error("manifest for `{plugin}` is invalid: {}", defects.join("; "))]
    Validation { plugin: String, defects: Vec<String> },

    /// Manifest carries warnings and the caller did not confirm them.
    #[error(
        "manifest for `{plugin}` has warnings that require confirmation: {}",
        warnings.join("; ")
    )]
    ConfirmationRequired {
        plugin: String,
        warnings: Vec<String>,
    },

    /// Version or dependency resolution failed (unsatisfiable constraint, cycle).
    #[error("resolution error: {message}")]
    Resolution { message: String },

    /// Checksum, signature, chain, or trust-level verification failed.
    #[error("security check failed for `{plugin}`: {reason}")]
    Security { plugin: String, reason: String },

    /// Download, extraction, or filesystem failure during installation.
    #[error("installation of `{plugin}` failed: {message}")]
    Installation {
        plugin: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Post-install runtime failure (health check, configuration).
    #[error("runtime error for `{plugin}`: {message}")]
    Runtime { plugin: String, message: String },

    /// Persistence backend errors.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Requested plugin or version is unknown.
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// Malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requirements for the operation are not met (e.g. dependents still attached).
    #[error("failed precondition: {message}")]
    FailedPrecondition {
        message: String,
        dependents: Vec<String>,
    },

    /// Operation refused by policy.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Transient outage of a required collaborator.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TallyError {
    /// Convenience constructor for an installation error without a source.
    pub fn installation(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        TallyError::Installation {
            plugin: plugin.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Convenience constructor for a plugin `NotFound` error.
    pub fn plugin_not_found(name: impl Into<String>) -> Self {
        TallyError::NotFound {
            kind: "plugin".to_string(),
            name: name.into(),
        }
    }

    /// Returns the RPC error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            TallyError::NotFound { .. } => ErrorCode::NotFound,
            TallyError::Config(_)
            | TallyError::Validation { .. }
            | TallyError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            TallyError::ConfirmationRequired { .. }
            | TallyError::Resolution { .. }
            | TallyError::FailedPrecondition { .. } => ErrorCode::FailedPrecondition,
            TallyError::Security { .. } | TallyError::PermissionDenied(_) => {
                ErrorCode::PermissionDenied
            }
            TallyError::Discovery { .. }
            | TallyError::AllSourcesFailed { .. }
            | TallyError::Unavailable(_)
            | TallyError::Timeout { .. }
            | TallyError::Cancelled => ErrorCode::Unavailable,
            TallyError::Installation { .. }
            | TallyError::Runtime { .. }
            | TallyError::Storage { .. }
            | TallyError::Internal(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            TallyError::plugin_not_found("aws-cost").code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            TallyError::FailedPrecondition {
                message: "dependents attached".into(),
                dependents: vec!["billing".into()],
            }
            .code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            TallyError::Security {
                plugin: "x".into(),
                reason: "checksum mismatch".into(),
            }
            .code(),
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            TallyError::AllSourcesFailed { failures: vec![] }.code(),
            ErrorCode::Unavailable
        );
        assert_eq!(
            TallyError::InvalidArgument("bad".into()).code(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn validation_error_lists_every_defect() {
        let err = TallyError::Validation {
            plugin: "aws-cost".into(),
            defects: vec!["name: bad".into(), "version: bad".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("name: bad"));
        assert!(msg.contains("version: bad"));
    }
}
