// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Tally plugin registry.
//!
//! `tally.toml` is layered from the system, user and working directories plus
//! `TALLY_*` variables, deserialized strictly and then validated as a whole.
//! Failures come back as [`ConfigError`] diagnostics.
//!
//! ```no_run
//! match tally_config::load_and_validate() {
//!     Ok(config) => println!("{} discovery sources", config.discovery.sources.len()),
//!     Err(errors) => tally_config::render_errors(&errors),
//! }
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, SourceFiles, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{
    DiscoveryConfig, FilesystemSourceConfig, GatewayConfig, GitSourceConfig, LifecycleConfig,
    RegistryConfig, RegistrySourceConfig, SecurityConfig, SourceConfig, TallyConfig,
    UrlSourceConfig,
};

fn finish(
    loaded: Result<TallyConfig, figment::Error>,
    sources: impl FnOnce() -> SourceFiles,
) -> Result<TallyConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| diagnostic::figment_to_config_errors(err, &sources()))?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Load the layered configuration and validate it.
pub fn load_and_validate() -> Result<TallyConfig, Vec<ConfigError>> {
    finish(loader::load_config(), layered_sources)
}

/// Validate an inline TOML document. Used by tests and embedders.
pub fn load_and_validate_str(toml_content: &str) -> Result<TallyConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_str(toml_content), || {
        let mut sources = SourceFiles::new();
        sources.add("<inline>", toml_content);
        sources
    })
}

/// Load an explicit file (`--config`) and validate it.
pub fn load_and_validate_path(path: &Path) -> Result<TallyConfig, Vec<ConfigError>> {
    if !path.is_file() {
        return Err(vec![ConfigError::Other(format!(
            "config file `{}` does not exist",
            path.display()
        ))]);
    }
    finish(loader::load_config_from_path(path), || {
        let mut sources = SourceFiles::new();
        sources.add_path(path);
        sources
    })
}

/// The files `load_config` may have read, for pointing diagnostics at them.
fn layered_sources() -> SourceFiles {
    let mut sources = SourceFiles::new();
    sources.add_path(Path::new("/etc/tally/tally.toml"));
    if let Some(dir) = dirs::config_dir() {
        sources.add_path(&dir.join("tally").join("tally.toml"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        sources.add_path(&cwd.join("tally.toml"));
    }
    sources
}
