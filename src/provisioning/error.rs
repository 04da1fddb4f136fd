use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::http_client::HttpError;

pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

#[derive(Debug, Clone, Error)]
pub enum ProvisioningError {
    #[error("provisioning rejected the request: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    #[error("provisioning rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("provisioning timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("provisioning unreachable: {message}")]
    Network { message: String },

    #[error("provisioning returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("invalid provisioning response: {message}")]
    InvalidResponse { message: String },
}

fn wait_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bwait\s+(\d+)\s+sec(?:ond)?s?\b").expect("wait pattern is a valid regex")
    })
}

impl ProvisioningError {
    /// Classify an error message returned by the provisioning backend.
    /// Messages asking the caller to "wait N seconds" are rate limits.
    pub fn from_message(message: impl Into<String>, code: Option<String>) -> Self {
        let message = message.into();
        if let Some(captures) = wait_pattern().captures(&message) {
            let retry_after_seconds = captures.get(1).and_then(|m| m.as_str().parse().ok());
            return ProvisioningError::RateLimited {
                message,
                retry_after_seconds,
            };
        }
        ProvisioningError::Rejected { message, code }
    }

    /// A timed-out call may or may not have reached the backend.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProvisioningError::Timeout { .. })
    }

    /// The call failed after it may have reached the backend, so an order may
    /// exist remotely even though no response arrived.
    pub fn may_have_been_delivered(&self) -> bool {
        match self {
            ProvisioningError::Timeout { .. } | ProvisioningError::Network { .. } => true,
            ProvisioningError::Upstream { status, .. } => *status >= 500,
            ProvisioningError::Rejected { .. }
            | ProvisioningError::RateLimited { .. }
            | ProvisioningError::InvalidResponse { .. } => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisioningError::Rejected { .. } => false,
            ProvisioningError::RateLimited { .. } => true,
            ProvisioningError::Timeout { .. } => true,
            ProvisioningError::Network { .. } => true,
            ProvisioningError::Upstream { status, .. } => *status >= 500,
            ProvisioningError::InvalidResponse { .. } => false,
        }
    }

    /// Message safe to show to the purchaser.
    ///
    /// Rate limits are not presented as "try again": retrying a payment-linked
    /// provisioning call by hand is unsafe, so the user is sent to support.
    pub fn user_message(&self) -> String {
        match self {
            ProvisioningError::RateLimited { .. }
            | ProvisioningError::Rejected { .. }
            | ProvisioningError::Upstream { .. }
            | ProvisioningError::InvalidResponse { .. } => {
                "We could not activate your eSIM. Your payment was received; please contact support with your order number.".to_string()
            }
            ProvisioningError::Timeout { .. } | ProvisioningError::Network { .. } => {
                "Your eSIM is taking longer than usual to activate. Check your dashboard shortly or contact support.".to_string()
            }
        }
    }
}

impl From<HttpError> for ProvisioningError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout { timeout_secs } => ProvisioningError::Timeout { timeout_secs },
            HttpError::Network { message } | HttpError::Init { message } => {
                ProvisioningError::Network { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_messages_are_rate_limits() {
        let err = ProvisioningError::from_message(
            "Too many requests. Please wait 30 seconds before retrying",
            None,
        );
        assert!(matches!(
            err,
            ProvisioningError::RateLimited {
                retry_after_seconds: Some(30),
                ..
            }
        ));
        assert!(err.user_message().contains("contact support"));
    }

    #[test]
    fn other_messages_are_rejections() {
        let err = ProvisioningError::from_message("Package not found", Some("404".to_string()));
        assert!(matches!(err, ProvisioningError::Rejected { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeouts_are_flagged() {
        let err: ProvisioningError = HttpError::Timeout { timeout_secs: 30 }.into();
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(err.may_have_been_delivered());
    }

    #[test]
    fn delivery_is_unknown_for_transport_and_server_errors() {
        let network: ProvisioningError = HttpError::Network {
            message: "connection reset".to_string(),
        }
        .into();
        assert!(network.may_have_been_delivered());
        assert!(ProvisioningError::Upstream {
            status: 503,
            message: "unavailable".to_string()
        }
        .may_have_been_delivered());

        assert!(!ProvisioningError::Upstream {
            status: 404,
            message: "not found".to_string()
        }
        .may_have_been_delivered());
        assert!(!ProvisioningError::from_message("please wait 10 seconds", None).may_have_been_delivered());
        assert!(!ProvisioningError::from_message("Package not found", None).may_have_been_delivered());
        assert!(!ProvisioningError::InvalidResponse {
            message: "missing orderId".to_string()
        }
        .may_have_been_delivered());
    }
}
