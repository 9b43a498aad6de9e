// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed list of manifest URLs.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tally_config::UrlSourceConfig;
use tally_core::TallyError;
use tally_plugin::{ManifestFormat, parse_document};
use tracing::warn;

use crate::http::{FetchError, RetryPolicy, get_with_retry};
use crate::source::{Candidate, ManifestSource, ScanContext, ScanOutput, source_error};

/// Fetches each configured URL independently.
pub struct UrlSource {
    name: String,
    urls: Vec<String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl UrlSource {
    pub fn new(
        config: &UrlSourceConfig,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, TallyError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                source_error(&config.name, format!("invalid header name `{key}`: {e}"))
            })?;
            let mut value = HeaderValue::from_str(value).map_err(|_| {
                source_error(&config.name, format!("invalid value for header `{key}`"))
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| source_error(&config.name, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: config.name.clone(),
            urls: config.urls.clone(),
            retry,
            client,
        })
    }
}

#[async_trait]
impl ManifestSource for UrlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, ctx: &ScanContext) -> Result<ScanOutput, TallyError> {
        let fetches = self.urls.iter().map(|url| async move {
            let body = get_with_retry(url, || self.client.get(url), self.retry, &ctx.cancel).await;
            (url, body)
        });
        let results = join_all(fetches).await;

        let cancelled = results
            .iter()
            .any(|(_, body)| matches!(body, Err(FetchError::Cancelled)));
        if cancelled || ctx.cancel.is_cancelled() {
            return Err(TallyError::Cancelled);
        }

        let mut output = ScanOutput::default();
        for (url, body) in results {
            match body {
                Ok(body) => {
                    let format = if url.to_ascii_lowercase().ends_with(".json") {
                        ManifestFormat::Json
                    } else {
                        ManifestFormat::detect(&body)
                    };
                    output.candidates.push(Candidate {
                        origin: url.clone(),
                        document: parse_document(&body, format).map_err(|e| e.to_string()),
                    });
                }
                Err(e) => {
                    warn!(source = %self.name, url = %url, error = %e, "manifest URL failed");
                    output.warnings.push(e.to_string());
                }
            }
        }

        if !self.urls.is_empty() && output.candidates.is_empty() {
            return Err(source_error(
                &self.name,
                format!("all {} URLs failed: {}", self.urls.len(), output.warnings.join("; ")),
            ));
        }
        Ok(output)
    }
}
