// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin manifests and the pure computations over them.
//!
//! Everything here is synchronous and side-effect free: parsing, schema and
//! business-rule validation, version constraints, and dependency resolution.

pub mod manifest;
pub mod resolver;
pub mod schema;
pub mod validation;
pub mod version;

pub use manifest::{
    Certificate, DependencyDecl, InstallStep, ManifestFormat, PluginManifest, parse_document,
    parse_manifest,
};
pub use resolver::{InstallPlan, ManifestCatalog, ResolveError, resolve, resolve_graph};
pub use validation::{
    Finding, ManifestValidator, Severity, ValidationResult, is_plain_file_name, validate,
};
pub use version::{UpdateKind, VersionConstraint, classify_update, resolve_version};
