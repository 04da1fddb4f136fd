//! Shared reqwest wrapper for the external REST collaborators.
//!
//! Retries (network errors, 429, 5xx) with exponential backoff apply only to
//! requests the caller marks idempotent. Everything else is sent once.

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("failed to initialize HTTP client: {message}")]
    Init { message: String },
}

/// Raw response: status plus body text. Interpretation is up to the caller.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Clone)]
pub struct ApiHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
    api_key: Option<String>,
}

impl ApiHttpClient {
    pub fn new(timeout: Duration, max_retries: u32, api_key: Option<String>) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Init {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
            api_key,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one request. `bearer` overrides the configured API key.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        bearer: Option<&str>,
        idempotent: bool,
    ) -> Result<ApiResponse, HttpError> {
        let attempts = if idempotent { self.max_retries + 1 } else { 1 };
        let mut last_error = None;

        for attempt in 0..attempts {
            let mut request = self.client.request(method.clone(), url).timeout(self.timeout);
            if let Some(token) = bearer.or(self.api_key.as_deref()) {
                request = request.bearer_auth(token);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if retryable && attempt + 1 < attempts {
                        warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt + 1,
                            "upstream error, retrying"
                        );
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    let body = resp.text().await.map_err(|e| self.map_error(e))?;
                    return Ok(ApiResponse { status, body });
                }
                Err(e) => {
                    let err = self.map_error(e);
                    if attempt + 1 < attempts && !matches!(err, HttpError::Timeout { .. }) {
                        warn!(url = %url, error = %err, attempt = attempt + 1, "request failed, retrying");
                        last_error = Some(err);
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or(HttpError::Network {
            message: "request failed".to_string(),
        }))
    }

    fn map_error(&self, e: reqwest::Error) -> HttpError {
        if e.is_timeout() {
            HttpError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            HttpError::Network {
                message: e.to_string(),
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 * (1 << attempt.min(6)))
}

/// Join a base URL and a path without doubling slashes.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Percent-encode a single path segment such as an order id.
pub fn path_segment(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.roamjet.net/", "/orders/1"),
            "https://api.roamjet.net/orders/1"
        );
    }

    #[test]
    fn path_segment_escapes_reserved_characters() {
        assert_eq!(path_segment("plan-1700000000-12"), "plan-1700000000-12");
        assert_eq!(path_segment("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff(0), Duration::from_millis(250));
        assert_eq!(backoff(2), Duration::from_millis(1000));
        assert_eq!(backoff(20), backoff(6));
    }
}
