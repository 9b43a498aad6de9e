// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tally status` command implementation.
//!
//! Queries the gateway health endpoint of a running daemon. Falls back
//! gracefully when the daemon is not running.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_config::TallyConfig;
use tally_core::TallyError;

use crate::commands::Output;

/// Health endpoint response from the gateway.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    installed: usize,
}

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub status: String,
    pub version: Option<String>,
    pub uptime_secs: Option<u64>,
    pub uptime_human: Option<String>,
    pub installed: Option<usize>,
    pub gateway_host: String,
    pub gateway_port: u16,
}

/// Compact uptime such as `3d 4h`, `2h 5m` or `42s`. Shows the two largest units.
fn format_uptime(secs: u64) -> String {
    let units = [
        (secs / 86_400, "d"),
        (secs % 86_400 / 3_600, "h"),
        (secs % 3_600 / 60, "m"),
        (secs % 60, "s"),
    ];
    let parts: Vec<String> = units
        .iter()
        .skip_while(|(value, _)| *value == 0)
        .take(2)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

async fn fetch_health(url: &str) -> Result<Option<HealthResponse>, TallyError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .map_err(|e| TallyError::Internal(format!("failed to create HTTP client: {e}")))?;

    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let health = resp.json().await.map_err(|e| {
                TallyError::Internal(format!("failed to parse health response: {e}"))
            })?;
            Ok(Some(health))
        }
        _ => Ok(None),
    }
}

/// Run the `tally status` command.
pub async fn run_status(config: &TallyConfig, output: Output) -> Result<(), TallyError> {
    let host = &config.gateway.host;
    let port = config.gateway.port;
    let url = format!("http://{host}:{port}/health");

    let health = fetch_health(&url).await?;
    let response = match &health {
        Some(h) => StatusResponse {
            running: true,
            status: h.status.clone(),
            version: Some(h.version.clone()),
            uptime_secs: Some(h.uptime_secs),
            uptime_human: Some(format_uptime(h.uptime_secs)),
            installed: Some(h.installed),
            gateway_host: host.clone(),
            gateway_port: port,
        },
        None => StatusResponse {
            running: false,
            status: "not running".to_string(),
            version: None,
            uptime_secs: None,
            uptime_human: None,
            installed: None,
            gateway_host: host.clone(),
            gateway_port: port,
        },
    };

    if output.is_json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        print_status(&response, &url, output.use_color());
    }
    Ok(())
}

fn print_status(status: &StatusResponse, url: &str, use_color: bool) {
    println!();
    println!("  tally status");
    println!("  {}", "-".repeat(35));

    if status.running {
        let uptime = status.uptime_human.as_deref().unwrap_or("?");
        if use_color {
            use colored::Colorize;
            println!(
                "    State:     {} {} (uptime: {uptime})",
                "✓".green(),
                status.status.green()
            );
        } else {
            println!("    State:     [OK] {} (uptime: {uptime})", status.status);
        }
        println!("    Version:   {}", status.version.as_deref().unwrap_or("?"));
        println!("    Installed: {}", status.installed.unwrap_or(0));
    } else {
        if use_color {
            use colored::Colorize;
            println!("    State:     {} {}", "✗".red(), "not running".red());
        } else {
            println!("    State:     [FAIL] not running");
        }
        println!("    Endpoint:  {url}");
        println!();
        println!("  Start with: tally serve");
    }
    println!();
}
