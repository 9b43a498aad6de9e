// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Version-control source: a shallow git checkout scanned like a directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tally_config::GitSourceConfig;
use tally_core::TallyError;
use tokio::process::Command;
use tracing::{debug, info};

use crate::filesystem::scan_tree;
use crate::source::{ManifestSource, ScanContext, ScanOutput, source_error};

/// Clones or refreshes `repository@branch` under the checkout root.
pub struct GitSource {
    name: String,
    repository: String,
    branch: String,
    subpath: Option<String>,
    manifest_filename: String,
    username: Option<String>,
    token: Option<String>,
    checkout_dir: PathBuf,
}

impl std::fmt::Debug for GitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitSource")
            .field("name", &self.name)
            .field("repository", &self.repository)
            .field("branch", &self.branch)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GitSource {
    pub fn new(config: &GitSourceConfig, checkout_root: &Path) -> Self {
        Self {
            name: config.name.clone(),
            repository: config.repository.clone(),
            branch: config.branch.clone(),
            subpath: config.subpath.clone(),
            manifest_filename: config.manifest_filename.clone(),
            username: config.username.clone(),
            token: config.token.clone(),
            checkout_dir: checkout_root.join(&config.name),
        }
    }

    /// Repository URL with credentials injected for https remotes.
    fn authenticated_url(&self) -> String {
        let Some(token) = &self.token else {
            return self.repository.clone();
        };
        match self.repository.strip_prefix("https://") {
            Some(rest) => {
                let user = self.username.as_deref().unwrap_or("git");
                format!("https://{user}:{token}@{rest}")
            }
            None => self.repository.clone(),
        }
    }

    fn scan_root(&self) -> Result<PathBuf, TallyError> {
        match &self.subpath {
            None => Ok(self.checkout_dir.clone()),
            Some(sub) => {
                let sub = Path::new(sub);
                let escapes = sub
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
                if escapes {
                    return Err(source_error(
                        &self.name,
                        format!("subpath `{}` must stay inside the checkout", sub.display()),
                    ));
                }
                Ok(self.checkout_dir.join(sub))
            }
        }
    }

    async fn git(&self, ctx: &ScanContext, args: &[&str]) -> Result<(), TallyError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .stdin(std::process::Stdio::null());
        // args[0] is the subcommand; the URL argument is never logged.
        let subcommand = args.first().copied().unwrap_or_default();
        debug!(source = %self.name, subcommand, "running git");

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(TallyError::Cancelled),
            out = cmd.output() => {
                out.map_err(|e| source_error(&self.name, format!("failed to run git: {e}")))?
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = match &self.token {
                Some(token) => stderr.replace(token.as_str(), "[REDACTED]"),
                None => stderr.into_owned(),
            };
            return Err(source_error(
                &self.name,
                format!("git {subcommand} failed: {}", stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn sync_checkout(&self, ctx: &ScanContext) -> Result<(), TallyError> {
        let dir = self.checkout_dir.to_string_lossy().into_owned();
        let url = self.authenticated_url();

        if self.checkout_dir.join(".git").is_dir() {
            self.git(ctx, &["-C", &dir, "remote", "set-url", "origin", &url]).await?;
            self.git(ctx, &["-C", &dir, "fetch", "--depth", "1", "origin", &self.branch]).await?;
            self.git(ctx, &["-C", &dir, "reset", "--hard", "FETCH_HEAD"]).await?;
        } else {
            if let Some(parent) = self.checkout_dir.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    source_error(&self.name, format!("cannot create checkout directory: {e}"))
                })?;
            }
            self.git(
                ctx,
                &["clone", "--depth", "1", "--branch", &self.branch, &url, &dir],
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ManifestSource for GitSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, ctx: &ScanContext) -> Result<ScanOutput, TallyError> {
        let root = self.scan_root()?;
        self.sync_checkout(ctx).await?;
        info!(source = %self.name, branch = %self.branch, "checkout up to date");

        let source = self.name.clone();
        let filename = self.manifest_filename.clone();
        let cancel = ctx.cancel.clone();
        tokio::task::spawn_blocking(move || scan_tree(&source, &root, true, &filename, &cancel))
            .await
            .map_err(|e| source_error(&self.name, format!("scan task failed: {e}")))?
    }
}
