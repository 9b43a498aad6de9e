// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP fetching with bounded retry on transient failures.

use std::time::Duration;

use tally_core::TallyError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::source::source_error;

/// Why [`get_with_retry`] produced no body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl FetchError {
    /// Scan error for `source`; cancellation stays cancellation.
    pub fn into_scan_error(self, source: &str) -> TallyError {
        match self {
            FetchError::Cancelled => TallyError::Cancelled,
            FetchError::Failed(message) => source_error(source, message),
        }
    }
}

/// Retry settings for transient network failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1 << attempt.saturating_sub(1).min(16))
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// GET `url` and return the body, retrying transient failures.
///
/// `build` is called once per attempt so headers can be re-applied.
pub async fn get_with_retry<F>(
    url: &str,
    build: F,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error = String::new();

    for attempt in 0..=retry.max_retries {
        if attempt > 0 {
            let delay = retry.delay(attempt);
            warn!(url, attempt, ?delay, "retrying after transient error");
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            r = build().send() => r,
        };

        match response {
            Ok(response) => {
                let status = response.status();
                debug!(url, status = %status, attempt, "response received");
                if status.is_success() {
                    return response.text().await.map_err(|e| {
                        FetchError::Failed(format!("failed to read response body: {e}"))
                    });
                }
                last_error = format!("{url} returned {status}");
                if !is_transient_status(status) {
                    return Err(FetchError::Failed(last_error));
                }
            }
            Err(e) => {
                last_error = format!("request to {url} failed: {e}");
                if !is_transient_error(&e) {
                    return Err(FetchError::Failed(last_error));
                }
            }
        }
    }

    Err(FetchError::Failed(last_error))
}
