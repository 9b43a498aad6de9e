// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded JSON Schema for manifest documents.
//!
//! The schema covers structure only (required fields, types, unknown keys).
//! Value-level rules such as the name pattern and semver syntax live in the
//! validator so each defect is reported once.

use std::sync::LazyLock;

use serde_json::Value;

/// Major version of the manifest format this build understands.
pub const SUPPORTED_SCHEMA_MAJOR: u64 = 1;
/// Highest minor version of the manifest format this build understands.
pub const SUPPORTED_SCHEMA_MINOR: u64 = 0;

/// Raw schema document.
pub const MANIFEST_SCHEMA: &str = include_str!("../schema/manifest.schema.json");

static VALIDATOR: LazyLock<Result<jsonschema::Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(MANIFEST_SCHEMA)
        .map_err(|e| format!("embedded manifest schema is not JSON: {e}"))?;
    jsonschema::validator_for(&schema)
        .map_err(|e| format!("embedded manifest schema does not compile: {e}"))
});

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dotted field path (`security.permissions[1]`), empty for the document root.
    pub path: String,
    pub message: String,
}

/// Check a document against the embedded schema, returning every violation.
pub fn check_document(document: &Value) -> Vec<SchemaViolation> {
    match &*VALIDATOR {
        Ok(validator) => validator
            .iter_errors(document)
            .map(|err| SchemaViolation {
                path: pointer_to_path(&err.instance_path.to_string()),
                message: err.to_string(),
            })
            .collect(),
        Err(message) => vec![SchemaViolation {
            path: String::new(),
            message: message.clone(),
        }],
    }
}

/// Compile an arbitrary JSON Schema and validate `instance` against it.
///
/// Used for plugin configuration schemas declared inside manifests.
pub fn check_against(schema: &Value, instance: &Value) -> Result<Vec<SchemaViolation>, String> {
    let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
    Ok(validator
        .iter_errors(instance)
        .map(|err| SchemaViolation {
            path: pointer_to_path(&err.instance_path.to_string()),
            message: err.to_string(),
        })
        .collect())
}

/// Convert a JSON pointer (`/security/permissions/1`) into a dotted path.
pub fn pointer_to_path(pointer: &str) -> String {
    let mut out = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.parse::<usize>().is_ok() {
            out.push('[');
            out.push_str(&segment);
            out.push(']');
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(&segment);
        }
    }
    out
}
