//! Shared HTTP client for all source adapters.
//!
//! Wraps `reqwest` with a user agent, a timeout and a small fixed-delay retry
//! for transport failures and 5xx answers. Client errors (4xx) are not
//! retried.

use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};

/// Default number of attempts per request
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Per-request timeout
const TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new() -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("covid-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Set the number of attempts per request (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    async fn send(&self, url: &str, query: &[(&str, &str)]) -> FetchResult<reqwest::Response> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            debug!(url, attempt, "GET");
            let result = self.client.get(url).query(query).send().await;
            let error = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let error = FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };
                    if !status.is_server_error() {
                        return Err(error);
                    }
                    error
                }
                Err(e) => FetchError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                },
            };

            warn!("Attempt {}/{} failed: {}", attempt, self.max_attempts, error);
            last_error = Some(error);
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Request {
            url: url.to_string(),
            message: "no attempt made".to_string(),
        }))
    }

    /// GET a resource as raw bytes.
    pub async fn get_bytes(&self, url: &str) -> FetchResult<Vec<u8>> {
        let response = self.send(url, &[]).await?;
        let bytes = response.bytes().await.map_err(|e| FetchError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        debug!(url, bytes = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }

    /// GET a resource as text.
    pub async fn get_text(&self, url: &str) -> FetchResult<String> {
        let bytes = self.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// GET a JSON document with query parameters.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> FetchResult<T> {
        let response = self.send(url, query).await?;
        let body = response.text().await.map_err(|e| FetchError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|e| FetchError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}
