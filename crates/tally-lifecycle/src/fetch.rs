// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Artifact download.
//!
//! Artifacts are held in memory until verification passes; nothing touches
//! the install root before that.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tally_core::TallyError;
use tracing::debug;

/// Fetches artifact bytes from a download locator.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync + 'static {
    async fn fetch(&self, plugin: &str, locator: &str) -> Result<Vec<u8>, TallyError>;
}

/// Fetcher for `http(s)://`, `file://` and plain filesystem paths.
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> Result<Self, TallyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TallyError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, plugin: &str, url: &str) -> Result<Vec<u8>, TallyError> {
        let response = self.client.get(url).send().await.map_err(|e| TallyError::Installation {
            plugin: plugin.to_string(),
            message: format!("download from {url} failed"),
            source: Some(Box::new(e)),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TallyError::installation(
                plugin,
                format!("download from {url} returned {status}"),
            ));
        }
        let bytes = response.bytes().await.map_err(|e| TallyError::Installation {
            plugin: plugin.to_string(),
            message: "failed to read artifact body".to_string(),
            source: Some(Box::new(e)),
        })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ArtifactFetcher for DefaultFetcher {
    async fn fetch(&self, plugin: &str, locator: &str) -> Result<Vec<u8>, TallyError> {
        debug!(plugin, locator, "fetching artifact");
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return self.fetch_http(plugin, locator).await;
        }

        let path = PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator));
        tokio::fs::read(&path).await.map_err(|e| TallyError::Installation {
            plugin: plugin.to_string(),
            message: format!("cannot read artifact {}", path.display()),
            source: Some(Box::new(e)),
        })
    }
}
