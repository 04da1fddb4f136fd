//! Resolution of the signed-in user behind a payment redirect.

pub mod http;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::domain::{Principal, RedirectParams};
use crate::http_client::path_segment as encode_query_value;

pub use http::HttpIdentityProvider;

#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("identity lookup timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("identity service unreachable: {message}")]
    Unavailable { message: String },

    #[error("invalid identity response: {message}")]
    InvalidResponse { message: String },
}

impl From<crate::http_client::HttpError> for IdentityError {
    fn from(err: crate::http_client::HttpError) -> Self {
        use crate::http_client::HttpError;
        match err {
            HttpError::Timeout { timeout_secs } => IdentityError::Timeout { timeout_secs },
            HttpError::Network { message } | HttpError::Init { message } => {
                IdentityError::Unavailable { message }
            }
        }
    }
}

/// Maps a bearer token to the user it belongs to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` when the token is unknown or expired.
    async fn resolve(&self, access_token: &str) -> Result<Option<Principal>, IdentityError>;
}

/// Resolve the principal within `timeout`.
///
/// An absent token, an unknown token, a slow identity service and an identity
/// error all yield `None`: the caller is sent through login rather than kept
/// waiting.
pub async fn resolve_principal(
    provider: &dyn IdentityProvider,
    access_token: Option<&str>,
    timeout: Duration,
) -> Option<Principal> {
    let token = access_token.map(str::trim).filter(|t| !t.is_empty())?;

    match tokio::time::timeout(timeout, provider.resolve(token)).await {
        Ok(Ok(principal)) => principal,
        Ok(Err(e)) => {
            warn!(error = %e, "identity lookup failed");
            None
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "identity lookup timed out");
            None
        }
    }
}

/// The payment-success path with every redirect parameter preserved.
pub fn return_path(success_path: &str, params: &RedirectParams) -> String {
    let query = params
        .query_pairs()
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, encode_query_value(&value)))
        .collect::<Vec<_>>()
        .join("&");

    if query.is_empty() {
        success_path.to_string()
    } else {
        format!("{}?{}", success_path, query)
    }
}

/// `{login_url}?returnUrl={return_to}` with the return path encoded.
pub fn login_redirect_url(login_url: &str, return_to: &str) -> String {
    let separator = if login_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}returnUrl={}",
        login_url,
        separator,
        encode_query_value(return_to)
    )
}
