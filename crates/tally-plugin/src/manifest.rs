// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin manifest model and parsing from `plugin.toml` / `plugin.json` documents.
//!
//! Enumerated fields (trust level, install method, permissions) are kept as
//! strings so that the validator can report an unknown value together with its
//! field path instead of failing deserialization on the first bad value.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::{InstallMethod, InstalledDependency, TallyError, TrustLevel};

/// Parsed plugin manifest describing an installable cost-source plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    /// Version of the manifest format itself (distinct from the plugin version).
    pub schema_version: String,
    /// Unique plugin name (e.g., "aws-cost").
    pub name: String,
    /// Semantic version of the plugin.
    pub version: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// RFC 3339 timestamp of the last publication, used to break merge ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub spec: SpecBlock,
    #[serde(default)]
    pub security: SecurityBlock,
    #[serde(default)]
    pub installation: InstallationBlock,
    #[serde(default)]
    pub configuration: ConfigurationBlock,
    #[serde(default)]
    pub requirements: RequirementsBlock,
}

/// What the plugin implements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecBlock {
    /// Cloud providers the plugin can price (e.g., "aws", "gcp").
    #[serde(default)]
    pub providers: Vec<String>,
    /// Capability tags (e.g., "projected_cost", "actual_cost").
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDefinition>,
}

/// RPC service the plugin exposes once running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub protocol: String,
    pub name: String,
    #[serde(default)]
    pub methods: Vec<String>,
}

/// Signing material and requested privileges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityBlock {
    /// Hex signature over the artifact digest (ed25519) or a minisign signature file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// `ed25519` (default) or `minisign`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Leaf first. Each certificate is signed by the next one's key.
    #[serde(default)]
    pub certificate_chain: Vec<Certificate>,
    #[serde(default = "default_trust_level")]
    pub trust_level: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub sandbox_required: bool,
}

impl Default for SecurityBlock {
    fn default() -> Self {
        Self {
            signature: None,
            signature_algorithm: None,
            public_key: None,
            certificate_chain: Vec::new(),
            trust_level: default_trust_level(),
            permissions: Vec::new(),
            sandbox_required: false,
        }
    }
}

fn default_trust_level() -> String {
    "untrusted".to_string()
}

/// One link of a certificate chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Certificate {
    pub subject: String,
    /// Hex-encoded Ed25519 public key certified by this link.
    pub public_key: String,
    pub issuer: String,
    /// Hex signature by the issuer over [`Certificate::signed_payload`].
    pub signature: String,
}

impl Certificate {
    /// Bytes the issuer signs.
    pub fn signed_payload(&self) -> Vec<u8> {
        format!("{}\n{}", self.subject, self.public_key).into_bytes()
    }
}

/// Where to get the artifact and how to lay it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallationBlock {
    #[serde(default = "default_install_method")]
    pub method: String,
    #[serde(default)]
    pub download_url: String,
    /// `sha256:<hex>` or bare hex interpreted with `checksum_algorithm`.
    #[serde(default)]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_algorithm: Option<String>,
    /// Executable inside an archive, or the file name for a binary download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_name: Option<String>,
    #[serde(default)]
    pub pre_install: Vec<InstallStep>,
    #[serde(default)]
    pub post_install: Vec<InstallStep>,
}

impl Default for InstallationBlock {
    fn default() -> Self {
        Self {
            method: default_install_method(),
            download_url: String::new(),
            checksum: String::new(),
            checksum_algorithm: None,
            binary_name: None,
            pre_install: Vec::new(),
            post_install: Vec::new(),
        }
    }
}

fn default_install_method() -> String {
    "binary".to_string()
}

impl InstallationBlock {
    /// Split the declared checksum into `(algorithm, lowercase hex digest)`.
    pub fn checksum_parts(&self) -> (String, String) {
        match self.checksum.split_once(':') {
            Some((algo, digest)) => (algo.to_ascii_lowercase(), digest.to_ascii_lowercase()),
            None => (
                self.checksum_algorithm
                    .as_deref()
                    .unwrap_or("sha256")
                    .to_ascii_lowercase(),
                self.checksum.to_ascii_lowercase(),
            ),
        }
    }
}

/// A declarative pre/post install step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallStep {
    /// A program must be resolvable on `PATH`.
    RequireCommand { command: String },
    /// An environment variable must be set.
    RequireEnv { variable: String },
    /// The host OS must be one of the listed values (`linux`, `macos`, `windows`).
    RequireOs { os: Vec<String> },
    /// Run a program; a non-zero exit fails the step.
    Run {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

/// Plugin configuration contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationBlock {
    /// JSON Schema for the plugin's configuration document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// What the plugin needs from the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementsBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_spec_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spec_version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
    #[serde(default)]
    pub system: SystemRequirements,
    /// Runtime name to version requirement (e.g., `glibc = ">=2.31"`).
    #[serde(default)]
    pub runtime: BTreeMap<String, String>,
}

/// A dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDecl {
    pub name: String,
    /// Version constraint, e.g. `^1.2.0`.
    #[serde(default = "default_constraint")]
    pub version: String,
    #[serde(default)]
    pub optional: bool,
}

fn default_constraint() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemRequirements {
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub arch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_disk_mb: Option<u64>,
}

impl PluginManifest {
    /// Parsed plugin version.
    pub fn semver(&self) -> Result<semver::Version, semver::Error> {
        semver::Version::parse(&self.version)
    }

    /// Parsed trust level, if the declared value is recognized.
    pub fn trust_level(&self) -> Option<TrustLevel> {
        TrustLevel::from_str(&self.security.trust_level).ok()
    }

    /// Parsed install method, if the declared value is recognized.
    pub fn install_method(&self) -> Option<InstallMethod> {
        InstallMethod::from_str(&self.installation.method).ok()
    }

    /// Parsed `updated_at`, if present and well-formed.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// `name@version` label for logs and messages.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Dependency declarations in the form stored on installation records.
    pub fn installed_dependencies(&self) -> Vec<InstalledDependency> {
        self.requirements
            .dependencies
            .iter()
            .map(|d| InstalledDependency {
                name: d.name.clone(),
                constraint: d.version.clone(),
                optional: d.optional,
            })
            .collect()
    }

    /// Build a typed manifest from an already-parsed document.
    pub fn from_value(value: Value) -> Result<Self, TallyError> {
        serde_json::from_value(value)
            .map_err(|e| TallyError::InvalidArgument(format!("invalid plugin manifest: {e}")))
    }

    /// Serialize back to a JSON document.
    pub fn to_value(&self) -> Result<Value, TallyError> {
        serde_json::to_value(self)
            .map_err(|e| TallyError::Internal(format!("failed to serialize manifest: {e}")))
    }
}

/// On-disk manifest encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Toml,
    Json,
}

impl ManifestFormat {
    /// Pick a format from the file extension; anything but `.json` is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ManifestFormat::Json,
            _ => ManifestFormat::Toml,
        }
    }

    /// Guess a format from content: JSON documents start with `{`.
    pub fn detect(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            ManifestFormat::Json
        } else {
            ManifestFormat::Toml
        }
    }
}

/// Parse raw manifest text into an untyped document for schema validation.
pub fn parse_document(content: &str, format: ManifestFormat) -> Result<Value, TallyError> {
    match format {
        ManifestFormat::Json => serde_json::from_str(content)
            .map_err(|e| TallyError::InvalidArgument(format!("invalid manifest JSON: {e}"))),
        ManifestFormat::Toml => toml::from_str(content)
            .map_err(|e| TallyError::InvalidArgument(format!("invalid manifest TOML: {e}"))),
    }
}

/// Parse a manifest from TOML or JSON content (format detected from content).
pub fn parse_manifest(content: &str) -> Result<PluginManifest, TallyError> {
    let doc = parse_document(content, ManifestFormat::detect(content))?;
    PluginManifest::from_value(doc)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_toml_manifest() {
        let manifest = parse_manifest(fixtures::VALID_TOML).unwrap();
        assert_eq!(manifest.name, "aws-cost");
        assert_eq!(manifest.semver().unwrap(), semver::Version::new(2, 1, 0));
        assert_eq!(manifest.trust_level(), Some(TrustLevel::Verified));
        assert_eq!(manifest.install_method(), Some(InstallMethod::Binary));
        assert_eq!(manifest.spec.providers, vec!["aws"]);
        assert_eq!(
            manifest.installation.pre_install,
            vec![InstallStep::RequireEnv {
                variable: "AWS_REGION".into()
            }]
        );
        assert_eq!(manifest.requirements.dependencies[0].version, "^1.0.0");
        assert!(!manifest.requirements.dependencies[0].optional);
        assert!(manifest.updated_at().is_some());
        assert_eq!(manifest.id(), "aws-cost@2.1.0");
    }

    #[test]
    fn parse_json_manifest() {
        let json = r#"{
            "schema_version": "1.0.0",
            "name": "gcp-cost",
            "version": "0.3.1",
            "author": "someone",
            "installation": {
                "method": "archive",
                "download_url": "https://example.com/gcp.tar.gz",
                "checksum": "abc",
                "checksum_algorithm": "SHA512",
                "binary_name": "gcp-cost"
            }
        }"#;
        let manifest = parse_manifest(json).unwrap();
        assert_eq!(manifest.install_method(), Some(InstallMethod::Archive));
        assert_eq!(
            manifest.installation.checksum_parts(),
            ("sha512".to_string(), "abc".to_string())
        );
        assert_eq!(manifest.security.trust_level, "untrusted");
    }

    #[test]
    fn checksum_prefix_wins_over_algorithm_field() {
        let block = InstallationBlock {
            checksum: "SHA256:ABCD".into(),
            checksum_algorithm: Some("sha512".into()),
            ..InstallationBlock::default()
        };
        assert_eq!(
            block.checksum_parts(),
            ("sha256".to_string(), "abcd".to_string())
        );
    }

    #[test]
    fn unknown_field_rejected() {
        let toml = r#"
schema_version = "1.0.0"
name = "x"
version = "1.0.0"
author = "a"
colour = "blue"
"#;
        assert!(parse_manifest(toml).is_err());
    }

    #[test]
    fn format_from_path() {
        assert_eq!(
            ManifestFormat::from_path(Path::new("a/plugin.json")),
            ManifestFormat::Json
        );
        assert_eq!(
            ManifestFormat::from_path(Path::new("a/plugin.toml")),
            ManifestFormat::Toml
        );
    }

    #[test]
    fn round_trips_through_value() {
        let manifest = parse_manifest(fixtures::VALID_TOML).unwrap();
        let value = manifest.to_value().unwrap();
        assert_eq!(PluginManifest::from_value(value).unwrap(), manifest);
    }
}
