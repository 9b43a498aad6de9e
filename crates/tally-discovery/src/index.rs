// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The merged, searchable plugin index.

use std::collections::BTreeMap;

use semver::Version;
use serde::Serialize;
use tally_plugin::{ManifestCatalog, PluginManifest};

/// All known versions of one plugin, as contributed by the winning source.
#[derive(Debug, Clone, Serialize)]
pub struct IndexEntry {
    pub name: String,
    /// Source that won the merge for this name.
    pub source: String,
    pub priority: i32,
    /// Newest first.
    pub versions: Vec<PluginManifest>,
}

impl IndexEntry {
    pub fn new(name: &str, source: &str, priority: i32, mut versions: Vec<PluginManifest>) -> Self {
        versions.sort_by(|a, b| semver_of(b).cmp(&semver_of(a)));
        versions.dedup_by(|a, b| a.version == b.version);
        Self {
            name: name.to_string(),
            source: source.to_string(),
            priority,
            versions,
        }
    }

    pub fn latest(&self) -> Option<&PluginManifest> {
        self.versions.first()
    }

    pub fn available_versions(&self) -> Vec<Version> {
        self.versions.iter().filter_map(|m| m.semver().ok()).collect()
    }
}

fn semver_of(m: &PluginManifest) -> Version {
    m.semver().unwrap_or_else(|_| Version::new(0, 0, 0))
}

/// Plugin name to index entry. Built once per discovery cycle, read-only after.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl PluginIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(name)
    }

    /// A specific version, or the latest when `version` is `None`.
    pub fn get_version(&self, name: &str, version: Option<&Version>) -> Option<&PluginManifest> {
        let entry = self.entries.get(name)?;
        match version {
            None => entry.latest(),
            Some(v) => entry
                .versions
                .iter()
                .find(|m| m.semver().is_ok_and(|mv| &mv == v)),
        }
    }

    pub fn latest(&self, name: &str) -> Option<&PluginManifest> {
        self.entries.get(name).and_then(IndexEntry::latest)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest manifests whose name, description, providers or capabilities
    /// contain `query` (case-insensitive). An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<&PluginManifest> {
        let needle = query.trim().to_lowercase();
        self.entries
            .values()
            .filter_map(IndexEntry::latest)
            .filter(|m| needle.is_empty() || matches_query(m, &needle))
            .collect()
    }

    /// Latest manifests supporting `provider`.
    pub fn by_provider(&self, provider: &str) -> Vec<&PluginManifest> {
        self.entries
            .values()
            .filter_map(IndexEntry::latest)
            .filter(|m| m.spec.providers.iter().any(|p| p.eq_ignore_ascii_case(provider)))
            .collect()
    }
}

fn matches_query(m: &PluginManifest, needle: &str) -> bool {
    m.name.to_lowercase().contains(needle)
        || m
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(needle))
        || m.spec.providers.iter().any(|p| p.to_lowercase().contains(needle))
        || m.spec.capabilities.iter().any(|c| c.to_lowercase().contains(needle))
}

impl ManifestCatalog for PluginIndex {
    fn versions(&self, name: &str) -> Vec<&PluginManifest> {
        self.entries
            .get(name)
            .map(|e| e.versions.iter().collect())
            .unwrap_or_default()
    }
}
