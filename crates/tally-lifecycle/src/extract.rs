// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Artifact extraction into the install root.
//!
//! Layout is `<install_root>/<name>/<version>/`. Artifacts are unpacked into
//! `<install_root>/.staging/` first and renamed into place, so a failed
//! extraction never leaves a half-written version directory behind.

use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tally_core::{InstallMethod, TallyError};
use tally_plugin::PluginManifest;
use tar::{Archive, EntryType};
use tracing::{debug, warn};

/// Name of the file holding the applied default configuration.
pub const CONFIG_FILE: &str = "config.json";

const STAGING_DIR: &str = ".staging";

/// Files written for one installed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub install_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub entry_point: Option<PathBuf>,
}

/// Directory a given version installs into.
pub fn version_dir(root: &Path, name: &str, version: &str) -> PathBuf {
    root.join(name).join(version)
}

fn io_err(plugin: &str, what: &str, e: std::io::Error) -> TallyError {
    TallyError::Installation {
        plugin: plugin.to_string(),
        message: what.to_string(),
        source: Some(Box::new(e)),
    }
}

/// Unpack `artifact` for `manifest` and move it to its version directory.
pub fn install_artifact(
    root: &Path,
    manifest: &PluginManifest,
    method: InstallMethod,
    artifact: &[u8],
) -> Result<Extracted, TallyError> {
    let plugin = manifest.name.as_str();
    let staging = root
        .join(STAGING_DIR)
        .join(format!("{}-{}", plugin, uuid::Uuid::new_v4()));
    fs::create_dir_all(&staging).map_err(|e| io_err(plugin, "cannot create staging directory", e))?;

    let result = unpack(&staging, manifest, method, artifact)
        .and_then(|()| promote(root, manifest, &staging));
    if result.is_err() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(plugin, error = %e, "failed to clean staging directory");
        }
    }
    result
}

fn entry_name(manifest: &PluginManifest) -> &str {
    manifest
        .installation
        .binary_name
        .as_deref()
        .unwrap_or(manifest.name.as_str())
}

fn unpack(
    staging: &Path,
    manifest: &PluginManifest,
    method: InstallMethod,
    artifact: &[u8],
) -> Result<(), TallyError> {
    let plugin = manifest.name.as_str();
    match method {
        InstallMethod::Binary => {
            let binary = entry_name(manifest);
            if !tally_plugin::is_plain_file_name(binary) {
                return Err(TallyError::installation(
                    plugin,
                    format!("binary name `{binary}` escapes the install directory"),
                ));
            }
            let target = staging.join(binary);
            fs::write(&target, artifact).map_err(|e| io_err(plugin, "cannot write binary", e))?;
            make_executable(&target).map_err(|e| io_err(plugin, "cannot mark binary executable", e))
        }
        InstallMethod::Archive => unpack_archive(staging, plugin, artifact),
    }
}

fn unpack_archive(staging: &Path, plugin: &str, artifact: &[u8]) -> Result<(), TallyError> {
    let mut archive = Archive::new(GzDecoder::new(artifact));
    let entries = archive
        .entries()
        .map_err(|e| io_err(plugin, "artifact is not a gzip tarball", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| io_err(plugin, "corrupt archive entry", e))?;
        let path = entry
            .path()
            .map_err(|e| io_err(plugin, "archive entry has an unreadable path", e))?
            .into_owned();
        if !is_contained(&path) {
            return Err(TallyError::installation(
                plugin,
                format!("archive entry `{}` escapes the install directory", path.display()),
            ));
        }
        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Directory => {}
            other => {
                return Err(TallyError::installation(
                    plugin,
                    format!("archive entry `{}` has unsupported type {other:?}", path.display()),
                ));
            }
        }
        let target = staging.join(&path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(plugin, "cannot create directory", e))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| io_err(plugin, "cannot unpack archive entry", e))?;
    }
    Ok(())
}

/// Only plain relative components are allowed inside archives.
fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().next().is_some()
}

fn promote(
    root: &Path,
    manifest: &PluginManifest,
    staging: &Path,
) -> Result<Extracted, TallyError> {
    let plugin = manifest.name.as_str();
    let dest = version_dir(root, plugin, &manifest.version);
    if dest.exists() {
        fs::remove_dir_all(&dest)
            .map_err(|e| io_err(plugin, "cannot replace existing version", e))?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| io_err(plugin, "cannot create plugin directory", e))?;
    }
    fs::rename(staging, &dest)
        .map_err(|e| io_err(plugin, "cannot move staged files into place", e))?;

    let mut files = Vec::new();
    collect_files(&dest, &mut files).map_err(|e| io_err(plugin, "cannot list installed files", e))?;
    files.sort();

    let wanted = entry_name(manifest);
    let entry_point = files
        .iter()
        .find(|f| f.file_name().is_some_and(|n| n == wanted))
        .cloned();
    if entry_point.is_none() {
        warn!(plugin, binary = wanted, "no entry point found in artifact");
    }

    debug!(plugin, dir = %dest.display(), files = files.len(), "artifact installed");
    Ok(Extracted {
        install_dir: dest,
        files,
        entry_point,
    })
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Write the manifest's configuration defaults to `config.json`.
/// Returns the written path, or `None` when the manifest declares no defaults.
pub fn apply_default_config(
    install_dir: &Path,
    manifest: &PluginManifest,
) -> Result<Option<PathBuf>, TallyError> {
    let defaults = &manifest.configuration.defaults;
    if defaults.is_empty() {
        return Ok(None);
    }
    let path = install_dir.join(CONFIG_FILE);
    let body = serde_json::to_vec_pretty(defaults).map_err(|e| {
        TallyError::installation(&manifest.name, format!("cannot encode defaults: {e}"))
    })?;
    fs::write(&path, body).map_err(|e| io_err(&manifest.name, "cannot write configuration", e))?;
    Ok(Some(path))
}

/// Delete one installed version, and the plugin directory if it is now empty.
pub fn remove_version_dir(install_dir: &Path) -> std::io::Result<()> {
    if install_dir.exists() {
        fs::remove_dir_all(install_dir)?;
    }
    if let Some(parent) = install_dir.parent() {
        let empty = fs::read_dir(parent).map(|mut d| d.next().is_none()).unwrap_or(false);
        if empty {
            fs::remove_dir(parent)?;
        }
    }
    Ok(())
}
