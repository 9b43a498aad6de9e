// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declarative pre- and post-install steps, and host requirement checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tally_core::TallyError;
use tally_plugin::{InstallStep, PluginManifest};
use tokio::process::Command;
use tracing::{debug, info};

/// When a step list runs relative to the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreInstall,
    PostInstall,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::PreInstall => "pre_install",
            Phase::PostInstall => "post_install",
        }
    }
}

/// Host OS in manifest vocabulary.
pub fn host_os() -> &'static str {
    std::env::consts::OS
}

fn arch_matches(declared: &str) -> bool {
    let host = std::env::consts::ARCH;
    let declared = declared.to_ascii_lowercase();
    declared == host
        || matches!(
            (declared.as_str(), host),
            ("amd64", "x86_64") | ("arm64", "aarch64")
        )
}

/// Check the manifest's `requirements.system` against this host.
pub fn check_system(manifest: &PluginManifest) -> Result<(), TallyError> {
    let system = &manifest.requirements.system;
    if !system.os.is_empty() && !system.os.iter().any(|os| os.eq_ignore_ascii_case(host_os())) {
        return Err(TallyError::FailedPrecondition {
            message: format!(
                "`{}` supports {:?}, host is {}",
                manifest.name,
                system.os,
                host_os()
            ),
            dependents: Vec::new(),
        });
    }
    if !system.arch.is_empty() && !system.arch.iter().any(|a| arch_matches(a)) {
        return Err(TallyError::FailedPrecondition {
            message: format!(
                "`{}` supports {:?}, host is {}",
                manifest.name,
                system.arch,
                std::env::consts::ARCH
            ),
            dependents: Vec::new(),
        });
    }
    Ok(())
}

/// Locate `command` on `PATH`.
pub fn find_on_path(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

/// Runs install steps with a default per-step timeout.
#[derive(Debug, Clone, Copy)]
pub struct StepRunner {
    default_timeout: Duration,
}

impl StepRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Run `steps` in order, stopping at the first failure.
    pub async fn run_all(
        &self,
        plugin: &str,
        phase: Phase,
        steps: &[InstallStep],
        working_dir: Option<&Path>,
    ) -> Result<(), TallyError> {
        for (i, step) in steps.iter().enumerate() {
            self.run(step, working_dir).await.map_err(|message| {
                TallyError::installation(
                    plugin,
                    format!("{}[{i}] failed: {message}", phase.label()),
                )
            })?;
            debug!(plugin, phase = phase.label(), step = i, "install step passed");
        }
        if !steps.is_empty() {
            info!(plugin, phase = phase.label(), steps = steps.len(), "install steps complete");
        }
        Ok(())
    }

    async fn run(&self, step: &InstallStep, working_dir: Option<&Path>) -> Result<(), String> {
        match step {
            InstallStep::RequireCommand { command } => find_on_path(command)
                .map(|_| ())
                .ok_or_else(|| format!("command `{command}` not found on PATH")),
            InstallStep::RequireEnv { variable } => match std::env::var_os(variable) {
                Some(v) if !v.is_empty() => Ok(()),
                _ => Err(format!("environment variable `{variable}` is not set")),
            },
            InstallStep::RequireOs { os } => {
                if os.iter().any(|o| o.eq_ignore_ascii_case(host_os())) {
                    Ok(())
                } else {
                    Err(format!("requires one of {os:?}, host is {}", host_os()))
                }
            }
            InstallStep::Run {
                program,
                args,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_timeout);
                let mut cmd = Command::new(program);
                cmd.args(args)
                    .kill_on_drop(true)
                    .stdin(std::process::Stdio::null());
                if let Some(dir) = working_dir {
                    cmd.current_dir(dir);
                }
                let output = tokio::time::timeout(timeout, cmd.output())
                    .await
                    .map_err(|_| format!("`{program}` timed out after {timeout:?}"))?
                    .map_err(|e| format!("cannot run `{program}`: {e}"))?;
                if output.status.success() {
                    Ok(())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(format!("`{program}` exited with {}: {}", output.status, stderr.trim()))
                }
            }
        }
    }
}
