// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin discovery for the Tally registry.
//!
//! Four source kinds (filesystem, remote registry, direct URLs, git checkout)
//! are scanned concurrently by the [`DiscoveryEngine`], each under its own
//! timeout and cancellation token. Every manifest is validated before it is
//! merged into a [`PluginIndex`]; the index is cached for the smallest TTL of
//! the sources that contributed to it.

pub mod engine;
pub mod filesystem;
pub mod git;
pub mod http;
pub mod index;
pub mod registry;
pub mod source;
pub mod url;

pub use engine::{DiscoveryEngine, DiscoveryOutcome, FailureKind, RejectedManifest, SourceFailure};
pub use index::{IndexEntry, PluginIndex};
pub use source::{Candidate, DiscoverySource, ManifestSource, ScanContext, ScanOutput};
