// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use tally_config::LifecycleConfig;
use tally_core::Sandbox;

/// Sandbox availability as declared by host configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredSandbox {
    name: String,
    available: bool,
}

impl ConfiguredSandbox {
    pub fn new(name: impl Into<String>, available: bool) -> Self {
        Self {
            name: name.into(),
            available,
        }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(config.sandbox_name.clone(), config.sandbox_available)
    }
}

impl Sandbox for ConfiguredSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }
}
