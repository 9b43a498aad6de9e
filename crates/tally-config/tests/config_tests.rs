// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Tally configuration system.

use tally_config::diagnostic::ConfigError;
use tally_config::model::SourceConfig;
use tally_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};
use tally_core::TrustLevel;

/// Valid TOML with all sections deserializes successfully.
#[test]
fn valid_toml_deserializes_into_tally_config() {
    let toml = r#"
[registry]
data_dir = "/var/lib/tally"
database_path = "/var/lib/tally/tally.db"
log_level = "debug"
host_spec_version = "1.4.0"

[discovery]
timeout_secs = 10
max_retries = 3

[[discovery.sources]]
type = "filesystem"
name = "local"
root = "/opt/tally/plugins"
priority = 10

[[discovery.sources]]
type = "registry"
name = "central"
base_url = "https://registry.example.com"
cache_ttl_secs = 60

[security]
min_trust_level = "verified"
trust_anchors = ["d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"]
require_signature = true

[lifecycle]
transition_timeout_secs = 120
health_interval_secs = 0
sandbox_available = true
sandbox_name = "bubblewrap"

[gateway]
host = "0.0.0.0"
port = 8080
bearer_token = "s3cret"
"#;

    let config = load_and_validate_str(toml).expect("valid config");
    assert_eq!(config.registry.log_level, "debug");
    assert_eq!(config.registry.host_spec_version.as_deref(), Some("1.4.0"));
    assert_eq!(config.discovery.timeout_secs, 10);
    assert_eq!(config.discovery.max_retries, 3);
    assert_eq!(config.discovery.sources.len(), 2);
    assert_eq!(config.discovery.sources[0].name(), "local");
    assert_eq!(config.discovery.sources[1].cache_ttl_secs(), Some(60));
    assert_eq!(config.security.min_trust_level, TrustLevel::Verified);
    assert!(config.security.require_signature);
    assert!(config.lifecycle.sandbox_available);
    assert_eq!(config.lifecycle.health_interval_secs, 0);
    assert_eq!(config.gateway.port, 8080);
    assert_eq!(config.gateway.bearer_token.as_deref(), Some("s3cret"));
}

/// Empty config yields defaults.
#[test]
fn empty_config_uses_defaults() {
    let config = load_config_from_str("").expect("empty config is fine");
    assert!(config.discovery.sources.is_empty());
    assert_eq!(config.discovery.timeout_secs, 30);
    assert_eq!(config.gateway.port, 7421);
    assert_eq!(config.lifecycle.transition_timeout_secs, 600);
    assert_eq!(config.security.min_trust_level, TrustLevel::Community);
}

/// Unknown key gets a "did you mean" suggestion.
#[test]
fn unknown_key_suggests_correction() {
    let toml = r#"
[gateway]
prot = 9000
"#;

    let errors = load_and_validate_str(toml).expect_err("unknown key");
    let suggestion = errors.iter().find_map(|e| match e {
        ConfigError::UnknownKey { suggestion, .. } => suggestion.clone(),
        _ => None,
    });
    assert_eq!(suggestion.as_deref(), Some("port"));
}

/// Unknown top-level section is rejected.
#[test]
fn unknown_section_rejected() {
    let toml = r#"
[telemetry]
enabled = true
"#;

    assert!(load_config_from_str(toml).is_err());
}

/// Wrong value type surfaces as an error.
#[test]
fn invalid_type_rejected() {
    let toml = r#"
[gateway]
port = "eighty"
"#;

    assert!(load_and_validate_str(toml).is_err());
}

/// Unknown trust level name is rejected at deserialization.
#[test]
fn unknown_trust_level_rejected() {
    let toml = r#"
[security]
min_trust_level = "blessed"
"#;

    assert!(load_config_from_str(toml).is_err());
}

/// Semantic validation reports every problem, not just the first.
#[test]
fn validation_errors_are_collected() {
    let toml = r#"
[discovery]
timeout_secs = 0

[[discovery.sources]]
type = "git"
name = "community"
repository = ""

[[discovery.sources]]
type = "git"
name = "community"
repository = "https://example.com/plugins.git"
"#;

    let errors = load_and_validate_str(toml).expect_err("invalid config");
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    assert!(messages.iter().any(|m| m.contains("timeout_secs")));
    assert!(messages.iter().any(|m| m.contains("repository must not be empty")));
    assert!(messages.iter().any(|m| m.contains("duplicate source name")));
}

/// Source order is preserved, since it decides merge ties.
#[test]
fn source_order_preserved() {
    let toml = r#"
[[discovery.sources]]
type = "url"
name = "b"
urls = ["https://example.com/b.json"]

[[discovery.sources]]
type = "url"
name = "a"
urls = ["https://example.com/a.json"]
"#;

    let config = load_and_validate_str(toml).expect("valid");
    let names: Vec<&str> = config.discovery.sources.iter().map(SourceConfig::name).collect();
    assert_eq!(names, vec!["b", "a"]);
}

/// Explicit config file paths are loaded and validated.
#[test]
fn explicit_path_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[gateway]\nport = 9999\n").unwrap();

    let config = load_and_validate_path(&path).expect("valid file");
    assert_eq!(config.gateway.port, 9999);
}

/// A missing explicit config file is an error, not silent defaults.
#[test]
fn explicit_missing_path_errors() {
    let dir = tempfile::tempdir().unwrap();
    let errors = load_and_validate_path(&dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("does not exist"));
}
