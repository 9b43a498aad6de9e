// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration diagnostics.
//!
//! Figment errors are turned into [`ConfigError`]s that miette renders with a
//! pointer into the offending `tally.toml` and, for misspelled keys, the
//! closest valid key.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use figment::error::Kind;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a candidate key must beat to be offered as a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration problem, ready for miette rendering.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in {section}")]
    #[diagnostic(
        code(tally::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Dotted table path, or `top level`.
        section: String,
        /// Closest valid key, when one is close enough.
        suggestion: Option<String>,
        valid_keys: Vec<String>,
        #[label("not a recognized key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` has the wrong type: found {found}")]
    #[diagnostic(code(tally::config::wrong_type), help("expected {expected}"))]
    WrongType {
        key: String,
        found: String,
        expected: String,
        #[label("expected {expected}")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` is required in {section}")]
    #[diagnostic(code(tally::config::missing_key), help("add `{key} = ...` under {section}"))]
    MissingKey { key: String, section: String },

    /// Semantic check that failed after deserialization.
    #[error("{message}")]
    #[diagnostic(code(tally::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(tally::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &[String]) -> String {
    let valid = valid_keys.join(", ");
    match suggestion {
        Some(s) => format!("did you mean `{s}`? valid keys here: {valid}"),
        None => format!("valid keys here: {valid}"),
    }
}

/// TOML documents that contributed to a load, by display name.
#[derive(Debug, Default)]
pub struct SourceFiles {
    files: Vec<(String, String)>,
}

impl SourceFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.files.push((name.into(), content.into()));
    }

    /// Read `path` if it exists; missing files are skipped.
    pub fn add_path(&mut self, path: &std::path::Path) {
        if let Ok(content) = std::fs::read_to_string(path) {
            self.add(path.display().to_string(), content);
        }
    }

    /// Document a figment error originated from. Falls back to the only
    /// document when figment did not record a file.
    fn origin(&self, error: &figment::Error) -> Option<&(String, String)> {
        let file = error
            .metadata
            .as_ref()
            .and_then(|m| m.source.as_ref())
            .and_then(|source| match source {
                figment::Source::File(path) => Some(path.display().to_string()),
                _ => None,
            });
        match file {
            Some(file) => self.files.iter().find(|(name, _)| *name == file),
            None if self.files.len() == 1 => self.files.first(),
            None => None,
        }
    }

    fn locate(
        &self,
        error: &figment::Error,
        table: &[String],
        key: &str,
    ) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
        let Some((name, content)) = self.origin(error) else {
            return (None, None);
        };
        match key_offset(content, table, key) {
            Some(offset) => (
                Some(SourceSpan::new(offset.into(), key.len())),
                Some(NamedSource::new(name, content.clone())),
            ),
            None => (None, None),
        }
    }
}

/// Table segments of a figment path, dropping array indices.
fn table_of(path: &[String]) -> Vec<String> {
    path.iter()
        .filter(|segment| segment.parse::<usize>().is_err())
        .cloned()
        .collect()
}

fn describe(table: &[String]) -> String {
    if table.is_empty() {
        "top level".to_string()
    } else {
        format!("[{}]", table.join("."))
    }
}

/// Convert every error figment collected.
pub fn figment_to_config_errors(err: figment::Error, sources: &SourceFiles) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| {
            let path: Vec<String> = error.path.clone();
            match &error.kind {
                Kind::UnknownField(key, expected) => {
                    let table = table_of(&path);
                    let (span, src) = sources.locate(&error, &table, key);
                    ConfigError::UnknownKey {
                        key: key.clone(),
                        section: describe(&table),
                        suggestion: suggest_key(key, expected),
                        valid_keys: expected.iter().map(|k| k.to_string()).collect(),
                        span,
                        src,
                    }
                }
                Kind::MissingField(key) => ConfigError::MissingKey {
                    key: key.to_string(),
                    section: describe(&table_of(&path)),
                },
                Kind::InvalidType(found, expected) => {
                    let (table, key) = match path.split_last() {
                        Some((key, table)) => (table_of(table), key.clone()),
                        None => (Vec::new(), String::new()),
                    };
                    let (span, src) = sources.locate(&error, &table, &key);
                    ConfigError::WrongType {
                        key: path.join("."),
                        found: found.to_string(),
                        expected: expected.to_string(),
                        span,
                        src,
                    }
                }
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

/// Byte offset of `key` inside `table` of a TOML document.
///
/// Tracks the current `[table]` / `[[table]]` header line by line; the key
/// must start a line (after indentation) and be followed by `=` or blanks.
pub fn key_offset(content: &str, table: &[String], key: &str) -> Option<usize> {
    let wanted = table.join(".");
    let mut current = String::new();
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(header) = trimmed.strip_prefix('[') {
            current = header
                .trim_start_matches('[')
                .split(']')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
        } else if current == wanted {
            if let Some(rest) = trimmed.strip_prefix(key) {
                if rest.trim_start().starts_with('=') {
                    return Some(offset + (line.len() - trimmed.len()));
                }
            }
        }
        offset += line.len();
    }
    None
}

/// Closest valid key by Jaro-Winkler similarity, above the threshold.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Print diagnostics to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut out = String::new();
        match handler.render_report(&mut out, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{out}"),
            Err(_) => eprintln!("error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn suggests_nearest_gateway_key() {
        let valid = &["host", "port", "bearer_token"];
        assert_eq!(suggest_key("prot", valid).as_deref(), Some("port"));
        assert_eq!(suggest_key("zzzzzz", valid), None);
    }

    #[test]
    fn suggests_plural_trust_anchors() {
        let valid = &["min_trust_level", "trust_anchors", "allow_manual_override"];
        assert_eq!(suggest_key("trust_anchor", valid).as_deref(), Some("trust_anchors"));
    }

    #[test]
    fn key_offset_respects_table() {
        let content = "port = 1\n[gateway]\nhost = \"x\"\nport = 80\n";
        let o = key_offset(content, &path(&["gateway"]), "port").unwrap();
        assert_eq!(&content[o..o + 4], "port");
        assert!(o > content.find("[gateway]").unwrap());
        assert_eq!(key_offset(content, &[], "port"), Some(0));
    }

    #[test]
    fn key_offset_in_source_array() {
        let content = "[[discovery.sources]]\ntype = \"url\"\n  nme = \"x\"\n";
        let table = table_of(&path(&["discovery", "sources", "0"]));
        let o = key_offset(content, &table, "nme").unwrap();
        assert_eq!(&content[o..o + 3], "nme");
    }

    #[test]
    fn key_prefix_is_not_a_match() {
        let content = "[gateway]\nport_range = 1\n";
        assert_eq!(key_offset(content, &path(&["gateway"]), "port"), None);
    }
}
