// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local directory tree source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tally_core::TallyError;
use tally_plugin::{ManifestFormat, parse_document};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::source::{Candidate, ManifestSource, ScanContext, ScanOutput, source_error};

/// Scans a directory tree for manifest files with a fixed name.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    name: String,
    root: PathBuf,
    recursive: bool,
    manifest_filename: String,
}

impl FilesystemSource {
    pub fn new(
        name: &str,
        root: impl AsRef<Path>,
        recursive: bool,
        manifest_filename: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            root: root.as_ref().to_path_buf(),
            recursive,
            manifest_filename: manifest_filename.to_string(),
        }
    }
}

#[async_trait]
impl ManifestSource for FilesystemSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, ctx: &ScanContext) -> Result<ScanOutput, TallyError> {
        let source = self.name.clone();
        let root = self.root.clone();
        let recursive = self.recursive;
        let filename = self.manifest_filename.clone();
        let cancel = ctx.cancel.clone();

        let scan = move || scan_tree(&source, &root, recursive, &filename, &cancel);
        tokio::task::spawn_blocking(scan)
            .await
            .map_err(|e| source_error(&self.name, format!("scan task failed: {e}")))?
    }
}

/// Walk `root` and parse every file named `filename`.
///
/// Runs on a blocking thread; `cancel` is polled between entries.
pub(crate) fn scan_tree(
    source: &str,
    root: &Path,
    recursive: bool,
    filename: &str,
    cancel: &CancellationToken,
) -> Result<ScanOutput, TallyError> {
    if !root.is_dir() {
        return Err(source_error(
            source,
            format!("root directory {} does not exist", root.display()),
        ));
    }

    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut output = ScanOutput::default();
    for entry in walker {
        if cancel.is_cancelled() {
            return Err(TallyError::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(source, error = %e, "skipping unreadable directory entry");
                output.warnings.push(e.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != filename {
            continue;
        }

        let path = entry.path();
        let origin = path.display().to_string();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(source, path = %origin, error = %e, "skipping unreadable manifest");
                output.warnings.push(format!("{origin}: {e}"));
                continue;
            }
        };
        let format = ManifestFormat::from_path(path);
        debug!(source, path = %origin, "found manifest");
        output.candidates.push(Candidate {
            origin,
            document: parse_document(&content, format).map_err(|e| e.to_string()),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MANIFEST: &str = r#"
schema_version = "1.0.0"
name = "local-cost"
version = "0.1.0"
author = "Ops"

[installation]
download_url = "https://example.com/local-cost"
checksum = "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
"#;

    fn ctx() -> ScanContext {
        ScanContext::new(CancellationToken::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn finds_nested_manifests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/plugin.toml"), MANIFEST).unwrap();
        std::fs::write(dir.path().join("plugin.toml"), MANIFEST).unwrap();
        std::fs::write(dir.path().join("a/other.toml"), MANIFEST).unwrap();

        let source = FilesystemSource::new("local", dir.path(), true, "plugin.toml");
        let output = source.scan(&ctx()).await.unwrap();
        assert_eq!(output.candidates.len(), 2);
        assert!(output.candidates.iter().all(|c| c.document.is_ok()));
    }

    #[tokio::test]
    async fn non_recursive_stays_at_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/plugin.toml"), MANIFEST).unwrap();

        let source = FilesystemSource::new("local", dir.path(), false, "plugin.toml");
        let output = source.scan(&ctx()).await.unwrap();
        assert!(output.candidates.is_empty());
    }

    #[tokio::test]
    async fn missing_root_fails_source() {
        let source = FilesystemSource::new("local", "/definitely/not/here", true, "plugin.toml");
        let err = source.scan(&ctx()).await.unwrap_err();
        assert!(matches!(err, TallyError::Discovery { .. }));
    }

    #[tokio::test]
    async fn malformed_document_is_candidate_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.toml"), "name = [unclosed").unwrap();

        let source = FilesystemSource::new("local", dir.path(), true, "plugin.toml");
        let output = source.scan(&ctx()).await.unwrap();
        assert_eq!(output.candidates.len(), 1);
        assert!(output.candidates[0].document.is_err());
    }

    #[tokio::test]
    async fn cancelled_scan_stops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.toml"), MANIFEST).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let source = FilesystemSource::new("local", dir.path(), true, "plugin.toml");
        let err = source
            .scan(&ScanContext::new(token, Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::Cancelled));
    }
}
