// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manifest validation.
//!
//! Structural checks come from the embedded JSON Schema, value and
//! cross-field rules from [`ManifestValidator`]. Every defect is collected
//! with its field path; nothing short-circuits.

use std::collections::HashSet;
use std::path::{Component, Path};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tally_core::{InstallMethod, Permission, TallyError, TrustLevel};

use crate::manifest::{InstallStep, PluginManifest};
use crate::schema::{self, SUPPORTED_SCHEMA_MAJOR, SUPPORTED_SCHEMA_MINOR};
use crate::version::VersionConstraint;

/// Plugin identity pattern.
pub static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap());

const SIGNATURE_ALGORITHMS: &[&str] = &["ed25519", "minisign"];
const CHECKSUM_ALGORITHMS: &[(&str, usize)] = &[("sha256", 64), ("sha512", 128)];

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Installation is impossible.
    Critical,
    /// Installation needs explicit confirmation.
    Warning,
    /// Advisory only.
    Info,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    /// Dotted path of the offending field.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Ordered findings plus a verdict. `passed` is false iff any finding is critical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub findings: Vec<Finding>,
    pub passed: bool,
}

impl ValidationResult {
    fn from_findings(findings: Vec<Finding>) -> Self {
        let passed = !findings.iter().any(|f| f.severity == Severity::Critical);
        Self { findings, passed }
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity == severity)
    }

    pub fn has_warnings(&self) -> bool {
        self.with_severity(Severity::Warning).next().is_some()
    }

    /// Gate an installation: criticals always fail, warnings fail unless confirmed.
    pub fn ensure_installable(&self, plugin: &str, confirmed: bool) -> Result<(), TallyError> {
        if !self.passed {
            return Err(TallyError::Validation {
                plugin: plugin.to_string(),
                defects: self
                    .with_severity(Severity::Critical)
                    .map(ToString::to_string)
                    .collect(),
            });
        }
        if self.has_warnings() && !confirmed {
            return Err(TallyError::ConfirmationRequired {
                plugin: plugin.to_string(),
                warnings: self
                    .with_severity(Severity::Warning)
                    .map(ToString::to_string)
                    .collect(),
            });
        }
        Ok(())
    }
}

/// Validates manifests for a given host.
#[derive(Debug, Clone, Default)]
pub struct ManifestValidator {
    host_spec_version: Option<semver::Version>,
}

impl ManifestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject manifests whose spec-version range excludes `version`.
    pub fn with_host_spec_version(mut self, version: semver::Version) -> Self {
        self.host_spec_version = Some(version);
        self
    }

    /// Validate an untyped document: schema first, then value and business rules.
    pub fn validate_document(&self, document: &Value) -> ValidationResult {
        let mut findings: Vec<Finding> = schema::check_document(document)
            .into_iter()
            .map(|v| Finding {
                severity: Severity::Critical,
                path: v.path,
                message: v.message,
            })
            .collect();

        match serde_json::from_value::<PluginManifest>(document.clone()) {
            Ok(manifest) => findings.extend(self.check(&manifest)),
            Err(e) if findings.is_empty() => findings.push(Finding {
                severity: Severity::Critical,
                path: String::new(),
                message: format!("manifest does not deserialize: {e}"),
            }),
            // Structural problems already reported by the schema.
            Err(_) => {}
        }

        ValidationResult::from_findings(findings)
    }

    /// Validate a typed manifest.
    pub fn validate(&self, manifest: &PluginManifest) -> ValidationResult {
        match manifest.to_value() {
            Ok(doc) => self.validate_document(&doc),
            Err(e) => ValidationResult::from_findings(vec![Finding {
                severity: Severity::Critical,
                path: String::new(),
                message: e.to_string(),
            }]),
        }
    }

    fn check(&self, m: &PluginManifest) -> Vec<Finding> {
        let mut out = Findings::default();

        self.check_identity(m, &mut out);
        check_security(m, &mut out);
        check_installation(m, &mut out);
        check_configuration(m, &mut out);
        self.check_requirements(m, &mut out);

        if m.spec.providers.is_empty() {
            out.warning("spec.providers", "plugin declares no supported providers");
        }

        out.0
    }

    fn check_identity(&self, m: &PluginManifest, out: &mut Findings) {
        match semver::Version::parse(&m.schema_version) {
            Ok(v) if v.major != SUPPORTED_SCHEMA_MAJOR => out.critical(
                "schema_version",
                format!(
                    "manifest format {v} is incompatible with supported {SUPPORTED_SCHEMA_MAJOR}.x"
                ),
            ),
            Ok(v) if v.minor > SUPPORTED_SCHEMA_MINOR => out.warning(
                "schema_version",
                format!(
                    "manifest format {v} is newer than supported \
                     {SUPPORTED_SCHEMA_MAJOR}.{SUPPORTED_SCHEMA_MINOR}; \
                     unknown features may be ignored"
                ),
            ),
            Ok(_) => {}
            Err(e) => out.critical("schema_version", format!("not a semantic version: {e}")),
        }

        if !NAME_PATTERN.is_match(&m.name) {
            out.critical(
                "name",
                format!(
                    "`{}` must be lowercase alphanumeric with inner hyphens",
                    m.name
                ),
            );
        }

        if let Err(e) = semver::Version::parse(&m.version) {
            out.critical("version", format!("`{}` is not a semantic version: {e}", m.version));
        }

        if let Some(raw) = &m.updated_at {
            if chrono::DateTime::parse_from_rfc3339(raw).is_err() {
                out.critical("updated_at", format!("`{raw}` is not an RFC 3339 timestamp"));
            }
        }
    }

    fn check_requirements(&self, m: &PluginManifest, out: &mut Findings) {
        let req = &m.requirements;
        let min = parse_optional_version(
            req.min_spec_version.as_deref(),
            "requirements.min_spec_version",
            out,
        );
        let max = parse_optional_version(
            req.max_spec_version.as_deref(),
            "requirements.max_spec_version",
            out,
        );

        if let (Some(min), Some(max)) = (&min, &max) {
            if min > max {
                out.critical(
                    "requirements",
                    format!("min_spec_version {min} is greater than max_spec_version {max}"),
                );
            }
        }

        if let Some(host) = &self.host_spec_version {
            let below = min.as_ref().is_some_and(|min| host < min);
            let above = max.as_ref().is_some_and(|max| host > max);
            if below || above {
                out.critical(
                    "requirements",
                    format!("host spec version {host} is outside the supported range"),
                );
            }
        }

        let mut seen = HashSet::new();
        for (i, dep) in req.dependencies.iter().enumerate() {
            let path = format!("requirements.dependencies[{i}]");
            if !NAME_PATTERN.is_match(&dep.name) {
                out.critical(
                    format!("{path}.name"),
                    format!("`{}` is not a valid plugin name", dep.name),
                );
            }
            if dep.name == m.name {
                out.critical(format!("{path}.name"), "plugin cannot depend on itself");
            }
            if !seen.insert(dep.name.as_str()) {
                out.critical(
                    format!("{path}.name"),
                    format!("duplicate dependency `{}`", dep.name),
                );
            }
            if let Err(e) = VersionConstraint::parse(&dep.version) {
                out.critical(format!("{path}.version"), e.to_string());
            }
        }

        for (i, os) in req.system.os.iter().enumerate() {
            if !matches!(os.as_str(), "linux" | "macos" | "windows" | "freebsd") {
                out.warning(
                    format!("requirements.system.os[{i}]"),
                    format!("unrecognized OS `{os}`"),
                );
            }
        }
    }
}

/// Validate with no host constraints.
pub fn validate(manifest: &PluginManifest) -> ValidationResult {
    ManifestValidator::new().validate(manifest)
}

#[derive(Default)]
struct Findings(Vec<Finding>);

impl Findings {
    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(Finding {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }

    fn critical(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Critical, path, message);
    }

    fn warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, path, message);
    }

    fn info(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Info, path, message);
    }
}

fn parse_optional_version(
    raw: Option<&str>,
    path: &str,
    out: &mut Findings,
) -> Option<semver::Version> {
    let raw = raw?;
    match semver::Version::parse(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            out.critical(path, format!("`{raw}` is not a semantic version: {e}"));
            None
        }
    }
}

fn check_security(m: &PluginManifest, out: &mut Findings) {
    let sec = &m.security;

    if TrustLevel::from_str(&sec.trust_level).is_err() {
        out.critical(
            "security.trust_level",
            format!(
                "`{}` is not one of untrusted, community, verified, official",
                sec.trust_level
            ),
        );
    }

    if let Some(algo) = &sec.signature_algorithm {
        if !SIGNATURE_ALGORITHMS.contains(&algo.to_ascii_lowercase().as_str()) {
            out.critical(
                "security.signature_algorithm",
                format!("`{algo}` is not one of {}", SIGNATURE_ALGORITHMS.join(", ")),
            );
        }
    }

    match (&sec.signature, &sec.public_key) {
        (Some(_), None) => {
            out.critical("security.public_key", "signature present without a public key")
        }
        (None, Some(_)) => {
            out.warning("security.signature", "public key present but manifest is unsigned")
        }
        (None, None) => out.warning("security.signature", "manifest is unsigned"),
        (Some(_), Some(_)) => {}
    }

    if !sec.certificate_chain.is_empty() && sec.public_key.is_none() {
        out.critical(
            "security.certificate_chain",
            "certificate chain requires a public key to anchor the leaf",
        );
    }

    let mut seen = HashSet::new();
    let mut unrestricted = Vec::new();
    for (i, raw) in sec.permissions.iter().enumerate() {
        let path = format!("security.permissions[{i}]");
        match Permission::from_str(raw) {
            Ok(p) => {
                if !seen.insert(p) {
                    out.info(path, format!("duplicate permission `{raw}`"));
                } else if p.requires_unrestricted() {
                    unrestricted.push(raw.as_str());
                }
            }
            Err(_) => out.critical(path, format!("unknown permission `{raw}`")),
        }
    }

    if sec.sandbox_required && !unrestricted.is_empty() {
        out.critical(
            "security.sandbox_required",
            format!(
                "sandboxed plugin cannot request unrestricted permissions: {}",
                unrestricted.join(", ")
            ),
        );
    }
}

/// A single normal path component: no separators, no `..`, not absolute.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn check_installation(m: &PluginManifest, out: &mut Findings) {
    let inst = &m.installation;

    let method = InstallMethod::from_str(&inst.method);
    if method.is_err() {
        out.critical(
            "installation.method",
            format!("`{}` is not one of binary, archive", inst.method),
        );
    }
    if let Some(binary) = inst.binary_name.as_deref() {
        if !is_plain_file_name(binary) {
            out.critical(
                "installation.binary_name",
                format!("`{binary}` must be a bare file name"),
            );
        }
    }
    if method == Ok(InstallMethod::Archive) && inst.binary_name.is_none() {
        out.info(
            "installation.binary_name",
            "archive install without binary_name has no entry point",
        );
    }

    let url = inst.download_url.as_str();
    if url.starts_with("http://") {
        out.warning("installation.download_url", "artifact is downloaded over plain HTTP");
    } else if !(url.is_empty()
        || url.starts_with("https://")
        || url.starts_with("file://")
        || url.starts_with('/'))
    {
        out.critical(
            "installation.download_url",
            format!("`{url}` must be an https, http, or file URL"),
        );
    }

    if !inst.checksum.is_empty() {
        let (algo, digest) = inst.checksum_parts();
        match CHECKSUM_ALGORITHMS.iter().find(|(name, _)| *name == algo) {
            Some((_, len)) => {
                if digest.len() != *len || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    out.critical(
                        "installation.checksum",
                        format!("{algo} digest must be {len} hex characters"),
                    );
                }
            }
            None => out.critical(
                "installation.checksum",
                format!("unsupported checksum algorithm `{algo}`"),
            ),
        }
    }

    let phases = [("pre_install", &inst.pre_install), ("post_install", &inst.post_install)];
    for (phase, steps) in phases {
        for (i, step) in steps.iter().enumerate() {
            if let InstallStep::Run { timeout_secs: Some(0), .. } = step {
                out.critical(
                    format!("installation.{phase}[{i}].timeout_secs"),
                    "timeout must be greater than 0",
                );
            }
        }
    }
}

fn check_configuration(m: &PluginManifest, out: &mut Findings) {
    let cfg = &m.configuration;

    for (i, key) in cfg.required.iter().enumerate() {
        if !cfg.defaults.contains_key(key) {
            out.info(
                format!("configuration.required[{i}]"),
                format!("`{key}` has no default and must be supplied by the operator"),
            );
        }
    }

    let Some(schema) = &cfg.schema else {
        return;
    };
    let defaults = Value::Object(cfg.defaults.clone().into_iter().collect());
    match schema::check_against(schema, &defaults) {
        Ok(violations) => {
            for v in violations {
                let path = if v.path.is_empty() {
                    "configuration.defaults".to_string()
                } else {
                    format!("configuration.defaults.{}", v.path)
                };
                out.critical(path, v.message);
            }
        }
        Err(e) => out.critical("configuration.schema", format!("invalid JSON Schema: {e}")),
    }
}
