// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tally serve`: the long-running registry daemon.

use std::sync::Arc;
use std::time::Duration;

use tally_config::TallyConfig;
use tally_core::TallyError;
use tally_gateway::{GatewayState, ServerConfig, start_server};
use tally_lifecycle::Registry;
use tracing::{info, warn};

use crate::shutdown;

/// Open the registry, run an initial discovery, start periodic health checks
/// and serve the gateway until a shutdown signal arrives.
pub async fn run_serve(config: TallyConfig) -> Result<(), TallyError> {
    let registry = Arc::new(Registry::open(&config).await?);
    let cancel = shutdown::install_signal_handler();

    match registry.discover_plugins(&cancel.child_token(), true).await {
        Ok(outcome) => info!(
            plugins = outcome.index.len(),
            failed_sources = outcome.failures.len(),
            rejected = outcome.rejected.len(),
            "initial discovery complete"
        ),
        Err(e) => warn!(error = %e, "initial discovery failed; serving installed plugins only"),
    }

    let interval = config.lifecycle.health_interval_secs;
    let health = (interval > 0).then(|| {
        registry.spawn_health_checks(Duration::from_secs(interval), cancel.child_token())
    });

    let state = GatewayState::new(Arc::clone(&registry), cancel.clone());
    let server_config = ServerConfig::from(&config.gateway);
    let served = start_server(&server_config, state).await;

    // The server also returns on bind failure; stop background work either way.
    cancel.cancel();
    if let Some(handle) = health {
        if let Err(e) = handle.await {
            warn!(error = %e, "health loop task failed");
        }
    }
    info!("tally stopped");
    served
}
