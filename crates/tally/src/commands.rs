// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot registry commands.
//!
//! Each command opens the registry in-process, runs one operation and
//! prints the result either as a table-ish summary or as JSON.

use std::io::IsTerminal;

use serde::Serialize;
use tally_config::TallyConfig;
use tally_core::{HealthReport, HealthStatus, InstallMode, InstallationRecord, TallyError};
use tally_lifecycle::{InstallOptions, Registry, UpdateOptions};
use tally_plugin::{Severity, ValidationResult};
use tokio_util::sync::CancellationToken;

use crate::{Commands, ConfirmArgs};

/// How results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
    color: bool,
}

impl Output {
    pub fn new(json: bool, plain: bool) -> Self {
        Self {
            json,
            color: !plain && std::io::stdout().is_terminal(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn use_color(&self) -> bool {
        self.color
    }

    fn json<T: Serialize>(&self, value: &T) {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
        );
    }

    fn ok(&self, message: &str) {
        if self.color {
            use colored::Colorize;
            println!("{} {message}", "✓".green());
        } else {
            println!("[OK] {message}");
        }
    }

    pub fn error(&self, err: &TallyError) {
        if self.json {
            let body = serde_json::json!({ "code": err.code(), "error": err.to_string() });
            eprintln!("{body}");
            return;
        }
        if self.color {
            use colored::Colorize;
            eprintln!("{} {}", "error:".red().bold(), err);
        } else {
            eprintln!("error: {err}");
        }
        if let TallyError::FailedPrecondition { dependents, .. } = err {
            for name in dependents {
                eprintln!("  required by {name}");
            }
        }
    }
}

fn install_options(confirm: ConfirmArgs) -> InstallOptions {
    InstallOptions {
        confirm_warnings: confirm.yes,
        mode: InstallMode::Interactive,
        trust_override: confirm.trust_override,
    }
}

fn health_marker(status: HealthStatus, color: bool) -> String {
    if !color {
        return format!("[{status}]");
    }
    use colored::Colorize;
    match status {
        HealthStatus::Healthy => status.to_string().green().to_string(),
        HealthStatus::Warning => status.to_string().yellow().to_string(),
        HealthStatus::Critical => status.to_string().red().to_string(),
        HealthStatus::Unknown => status.to_string().dimmed().to_string(),
    }
}

fn record_line(record: &InstallationRecord, color: bool) -> String {
    let attention = if record.needs_attention { "  (needs attention)" } else { "" };
    format!(
        "  {:<24} {:<10} {:<10} {}{attention}",
        record.name,
        record.version.to_string(),
        record.trust_level.to_string(),
        health_marker(record.health.status, color),
    )
}

fn print_validation(result: &ValidationResult, output: Output) {
    for finding in &result.findings {
        let label = match finding.severity {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        println!("  {label:<8} {}: {}", finding.path, finding.message);
    }
    if result.passed {
        output.ok("manifest is valid");
    } else {
        println!("manifest has critical defects");
    }
}

fn print_health(name: &str, report: &HealthReport, output: Output) {
    println!(
        "  {:<24} {} {}",
        name,
        health_marker(report.status, output.color),
        report.message.as_deref().unwrap_or("")
    );
}

/// Run every command except `serve` and `status`.
pub async fn run(
    config: &TallyConfig,
    command: Commands,
    output: Output,
) -> Result<(), TallyError> {
    let registry = Registry::open(config).await?;

    match command {
        Commands::Discover { refresh } => {
            let outcome = registry
                .discover_plugins(&CancellationToken::new(), refresh)
                .await?;
            if output.json {
                output.json(&outcome);
                return Ok(());
            }
            output.ok(&format!("{} plugins discovered", outcome.index.len()));
            for failure in &outcome.failures {
                println!("  source {} failed: {}", failure.source, failure.message);
            }
            for rejected in &outcome.rejected {
                println!(
                    "  rejected {} from {}",
                    rejected.name.as_deref().unwrap_or(&rejected.origin),
                    rejected.source
                );
            }
            for warning in &outcome.warnings {
                println!("  warning: {warning}");
            }
        }
        Commands::Search { query, provider } => {
            let found = registry.search_plugins(&query, provider.as_deref()).await?;
            if output.json {
                output.json(&found);
                return Ok(());
            }
            for m in &found {
                println!(
                    "  {:<24} {:<10} {}",
                    m.name,
                    m.version,
                    m.description.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Show { name, version } => {
            let manifest = registry.get_plugin_manifest(&name, version.as_deref()).await?;
            output.json(&manifest);
        }
        Commands::Validate { path } => {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                TallyError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
            })?;
            let result = registry.validate_plugin_text(&content)?;
            if output.json {
                output.json(&result);
            } else {
                print_validation(&result, output);
            }
            if !result.passed {
                return Err(TallyError::Validation {
                    plugin: path.display().to_string(),
                    defects: result
                        .with_severity(Severity::Critical)
                        .map(ToString::to_string)
                        .collect(),
                });
            }
        }
        Commands::Install {
            name,
            version,
            confirm,
        } => {
            let report = registry
                .install_plugin(&name, version.as_deref(), install_options(confirm))
                .await?;
            if output.json {
                output.json(&report);
                return Ok(());
            }
            for warning in &report.warnings {
                println!("  note: {warning}");
            }
            for installed in &report.installed {
                output.ok(&format!(
                    "installed {} {} ({})",
                    installed.record.name, installed.record.version, installed.health.status
                ));
            }
        }
        Commands::Update {
            name,
            version,
            acknowledge,
            force,
            confirm,
        } => {
            let options = UpdateOptions {
                acknowledge,
                force,
                install: install_options(confirm),
            };
            let outcome = registry
                .update_plugin(&name, version.as_deref(), options)
                .await?;
            if output.json {
                output.json(&outcome);
            } else {
                output.ok(&format!(
                    "updated {name} {} -> {} ({} update)",
                    outcome.from, outcome.to, outcome.kind
                ));
            }
        }
        Commands::Remove { name, cascade } => {
            let outcome = registry.remove_plugin(&name, cascade).await?;
            if output.json {
                output.json(&outcome);
            } else {
                output.ok(&format!("removed {}", outcome.removed.join(", ")));
            }
        }
        Commands::List => {
            let records = registry.list_installed_plugins().await;
            if output.json {
                output.json(&records);
                return Ok(());
            }
            if records.is_empty() {
                println!("no plugins installed");
            }
            for record in &records {
                println!("{}", record_line(record, output.color));
            }
        }
        Commands::Health { name } => {
            let reports = match name {
                Some(name) => {
                    let report = registry.check_plugin_health(&name).await?;
                    vec![(name, report)]
                }
                None => registry.lifecycle().check_all().await?,
            };
            if output.json {
                let map: std::collections::BTreeMap<_, _> = reports.into_iter().collect();
                output.json(&map);
                return Ok(());
            }
            for (name, report) in &reports {
                print_health(name, report, output);
            }
        }
        Commands::Serve | Commands::Status => {
            return Err(TallyError::Internal(
                "serve and status are dispatched separately".to_string(),
            ));
        }
    }
    Ok(())
}
