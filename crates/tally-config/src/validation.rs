// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as unique source names, http(s) URLs, and well-formed trust anchors.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::{SourceConfig, TallyConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &TallyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let registry = &config.registry;
    if registry.data_dir.trim().is_empty() {
        errors.push(invalid("registry.data_dir must not be empty"));
    }
    if registry.database_path.trim().is_empty() {
        errors.push(invalid("registry.database_path must not be empty"));
    }
    if let Some(dir) = &registry.install_dir {
        if dir.trim().is_empty() {
            errors.push(invalid("registry.install_dir must not be empty when set"));
        }
    }
    if !LOG_LEVELS.contains(&registry.log_level.to_ascii_lowercase().as_str()) {
        errors.push(invalid(format!(
            "registry.log_level `{}` is not one of {}",
            registry.log_level,
            LOG_LEVELS.join(", ")
        )));
    }
    if let Some(v) = &registry.host_spec_version {
        if semver::Version::parse(v).is_err() {
            errors.push(invalid(format!(
                "registry.host_spec_version `{v}` is not a semantic version"
            )));
        }
    }

    let discovery = &config.discovery;
    if discovery.timeout_secs == 0 {
        errors.push(invalid("discovery.timeout_secs must be greater than 0"));
    }

    let mut seen_names = HashSet::new();
    for (i, source) in discovery.sources.iter().enumerate() {
        let name = source.name();
        if name.trim().is_empty() {
            errors.push(invalid(format!(
                "discovery.sources[{i}].name must not be empty"
            )));
        } else if !seen_names.insert(name) {
            errors.push(invalid(format!(
                "duplicate source name `{name}` in [[discovery.sources]]"
            )));
        }
        validate_source(i, source, &mut errors);
    }

    for (i, anchor) in config.security.trust_anchors.iter().enumerate() {
        if anchor.len() != 64 || !anchor.chars().all(|c| c.is_ascii_hexdigit()) {
            errors.push(invalid(format!(
                "security.trust_anchors[{i}] must be a 64-character hex Ed25519 public key"
            )));
        }
    }

    if config.lifecycle.transition_timeout_secs == 0 {
        errors.push(invalid("lifecycle.transition_timeout_secs must be greater than 0"));
    }
    if config.lifecycle.step_timeout_secs == 0 {
        errors.push(invalid("lifecycle.step_timeout_secs must be greater than 0"));
    }

    if config.gateway.host.trim().is_empty() {
        errors.push(invalid("gateway.host must not be empty"));
    }
    if config.gateway.port == 0 {
        errors.push(invalid("gateway.port must not be 0"));
    }
    if let Some(token) = &config.gateway.bearer_token {
        if token.trim().is_empty() {
            errors.push(invalid("gateway.bearer_token must not be empty when set"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_source(i: usize, source: &SourceConfig, errors: &mut Vec<ConfigError>) {
    match source {
        SourceConfig::Filesystem(fs) => {
            if fs.root.trim().is_empty() {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].root must not be empty"
                )));
            }
            if fs.manifest_filename.trim().is_empty() {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].manifest_filename must not be empty"
                )));
            }
        }
        SourceConfig::Registry(reg) => {
            if !is_http_url(&reg.base_url) {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].base_url `{}` must start with http:// or https://",
                    reg.base_url
                )));
            }
            if reg.page_size == 0 {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].page_size must be greater than 0"
                )));
            }
            if reg.timeout_secs == Some(0) {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].timeout_secs must be greater than 0"
                )));
            }
        }
        SourceConfig::Url(url) => {
            if url.urls.is_empty() {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].urls must list at least one URL"
                )));
            }
            for u in &url.urls {
                if !is_http_url(u) {
                    errors.push(invalid(format!(
                        "discovery.sources[{i}].urls entry `{u}` \
                         must start with http:// or https://"
                    )));
                }
            }
        }
        SourceConfig::Git(git) => {
            if git.repository.trim().is_empty() {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].repository must not be empty"
                )));
            }
            if git.branch.trim().is_empty() {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].branch must not be empty"
                )));
            }
            if git.token.is_some() && git.repository.starts_with("git@") {
                errors.push(invalid(format!(
                    "discovery.sources[{i}].token is only supported for https repositories"
                )));
            }
        }
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
