// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote plugin registry source.
//!
//! Pages through `GET {base_url}/v1/plugins?page=N&per_page=M`. Each page is
//! `{"plugins": [<manifest>...], "next_page": <n>|null}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tally_config::RegistrySourceConfig;
use tally_core::TallyError;
use tracing::{debug, info};

use crate::http::{RetryPolicy, get_with_retry};
use crate::source::{Candidate, ManifestSource, ScanContext, ScanOutput, source_error};

/// Upper bound on pages fetched in one scan.
const MAX_PAGES: u32 = 1000;

#[derive(Debug, Deserialize)]
struct PluginPage {
    #[serde(default)]
    plugins: Vec<Value>,
    #[serde(default)]
    next_page: Option<u32>,
}

/// Paginated HTTP registry.
pub struct RegistrySource {
    name: String,
    base_url: reqwest::Url,
    api_key: Option<String>,
    page_size: u32,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl std::fmt::Debug for RegistrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySource")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl RegistrySource {
    pub fn new(
        config: &RegistrySourceConfig,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, TallyError> {
        let base_url = reqwest::Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| source_error(&config.name, format!("invalid base_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| source_error(&config.name, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: config.name.clone(),
            base_url,
            api_key: config.api_key.clone(),
            page_size: config.page_size.max(1),
            retry,
            client,
        })
    }

    fn page_url(&self, page: u32) -> Result<reqwest::Url, TallyError> {
        let mut url = self
            .base_url
            .join(&format!("{}/v1/plugins", self.base_url.path().trim_end_matches('/')))
            .map_err(|e| source_error(&self.name, format!("invalid registry URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &self.page_size.to_string());
        Ok(url)
    }

    fn request(&self, url: &reqwest::Url) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ManifestSource for RegistrySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, ctx: &ScanContext) -> Result<ScanOutput, TallyError> {
        let mut output = ScanOutput::default();
        let mut page = 1;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(TallyError::Cancelled);
            }
            let url = self.page_url(page)?;
            let body = get_with_retry(url.as_str(), || self.request(&url), self.retry, &ctx.cancel)
                .await
                .map_err(|e| e.into_scan_error(&self.name))?;
            let parsed: PluginPage = serde_json::from_str(&body)
                .map_err(|e| source_error(&self.name, format!("malformed page {page}: {e}")))?;

            let count = parsed.plugins.len();
            debug!(source = %self.name, page, count, "registry page fetched");
            for (i, document) in parsed.plugins.into_iter().enumerate() {
                output.candidates.push(Candidate {
                    origin: format!("{url}#{i}"),
                    document: Ok(document),
                });
            }

            match parsed.next_page {
                Some(next) if next > page && next <= MAX_PAGES => page = next,
                _ => break,
            }
        }

        info!(source = %self.name, manifests = output.candidates.len(), "registry scan complete");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, api_key: Option<&str>) -> RegistrySourceConfig {
        RegistrySourceConfig {
            name: "hub".into(),
            base_url: base_url.into(),
            api_key: api_key.map(String::from),
            timeout_secs: None,
            page_size: 2,
            priority: 0,
            cache_ttl_secs: None,
        }
    }

    fn ctx() -> ScanContext {
        ScanContext::new(CancellationToken::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/plugins"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "plugins": [{"name": "a"}, {"name": "b"}],
                "next_page": 2
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/plugins"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "plugins": [{"name": "c"}],
                "next_page": null
            })))
            .mount(&server)
            .await;

        let source = RegistrySource::new(
            &config(&server.uri(), None),
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .unwrap();
        let output = source.scan(&ctx()).await.unwrap();
        assert_eq!(output.candidates.len(), 3);
    }

    #[tokio::test]
    async fn sends_bearer_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"plugins": []})))
            .expect(1)
            .mount(&server)
            .await;

        let source = RegistrySource::new(
            &config(&server.uri(), Some("s3cret")),
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .unwrap();
        let output = source.scan(&ctx()).await.unwrap();
        assert!(output.candidates.is_empty());
    }

    #[tokio::test]
    async fn server_error_fails_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let source = RegistrySource::new(
            &config(&server.uri(), None),
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .unwrap();
        let err = source.scan(&ctx()).await.unwrap_err();
        assert!(matches!(err, TallyError::Discovery { .. }));
    }

    #[tokio::test]
    async fn cancel_while_retrying_reports_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = RegistrySource::new(
            &config(&server.uri(), None),
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_secs(30)),
        )
        .unwrap();
        let ctx = ctx();
        let trigger = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = source.scan(&ctx).await.unwrap_err();
        assert!(matches!(err, TallyError::Cancelled), "{err}");
    }

    #[test]
    fn debug_redacts_api_key() {
        let source = RegistrySource::new(
            &config("https://hub.example.com", Some("s3cret")),
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .unwrap();
        let rendered = format!("{source:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
