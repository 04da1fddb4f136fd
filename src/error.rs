//! Unified error handling for the reconciliation service
//!
//! Layer-specific errors (`StoreError`, `ProvisioningError`, ...) are mapped
//! into [`AppError`], which carries the HTTP status, a machine-readable
//! [`ErrorCode`] and a message that is safe to show to the purchaser.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::config::ConfigError;
use crate::provisioning::ProvisioningError;
use crate::services::qr::QrError;
use crate::services::reconciliation::{FailureReason, ReconciliationError};
use crate::services::webhook_processor::WebhookProcessorError;
use crate::store::StoreError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "AUTHENTICATION_REQUIRED")]
    AuthenticationRequired,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "ORDER_FORBIDDEN")]
    OrderForbidden,
    #[serde(rename = "ORDER_NOT_COMPLETED")]
    OrderNotCompleted,

    // Validation errors (400/401)
    #[serde(rename = "MISSING_PAYMENT_INFO")]
    MissingPaymentInfo,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,

    // Infrastructure errors (5xx)
    #[serde(rename = "ORDER_STORE_ERROR")]
    OrderStoreError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "PROVISIONING_FAILED")]
    ProvisioningFailed,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No signed-in user; `login_url` returns to the same redirect afterwards.
    AuthenticationRequired { login_url: String },
    OrderNotFound { order_id: String },
    /// The order belongs to another user
    OrderForbidden { order_id: String },
    OrderNotCompleted { order_id: String },
}

/// Infrastructure-level errors (order store, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    OrderStore { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// `user_message` is already safe to display.
    Provisioning {
        message: String,
        user_message: String,
        is_retryable: bool,
    },
    Timeout { service: String, user_message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingPaymentInfo { field: String },
    InvalidSignature { reason: String },
    InvalidPayload { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn authentication_required(login_url: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::AuthenticationRequired {
            login_url: login_url.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AuthenticationRequired { .. } => 401,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::OrderForbidden { .. } => 403,
                DomainError::OrderNotCompleted { .. } => 409,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::OrderStore { .. } => 503,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Provisioning { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingPaymentInfo { .. } => 400,
                ValidationError::InvalidSignature { .. } => 401,
                ValidationError::InvalidPayload { .. } => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AuthenticationRequired { .. } => ErrorCode::AuthenticationRequired,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::OrderForbidden { .. } => ErrorCode::OrderForbidden,
                DomainError::OrderNotCompleted { .. } => ErrorCode::OrderNotCompleted,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::OrderStore { .. } => ErrorCode::OrderStoreError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Provisioning { .. } => ErrorCode::ProvisioningFailed,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingPaymentInfo { .. } => ErrorCode::MissingPaymentInfo,
                ValidationError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                ValidationError::InvalidPayload { .. } => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AuthenticationRequired { .. } => {
                    "Please sign in to finish activating your eSIM.".to_string()
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::OrderForbidden { .. } => {
                    "This order belongs to a different account".to_string()
                }
                DomainError::OrderNotCompleted { order_id } => {
                    format!("Order '{}' has not finished activating yet", order_id)
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::OrderStore { .. } => {
                    "We could not confirm your order right now. Your payment was received; please refresh this page in a moment or contact support.".to_string()
                }
                InfrastructureError::Configuration { .. } => {
                    "Service temporarily unavailable. Please try again later".to_string()
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Provisioning { user_message, .. } => user_message.clone(),
                ExternalError::Timeout { user_message, .. } => user_message.clone(),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingPaymentInfo { field } => format!(
                    "Payment information is incomplete ({}). Please contact support with your receipt.",
                    field
                ),
                ValidationError::InvalidSignature { .. } => "Invalid signature".to_string(),
                ValidationError::InvalidPayload { reason } => {
                    format!("Invalid payload: {}", reason)
                }
            },
        }
    }

    /// Structured details for the error body.
    pub fn details(&self) -> Option<JsonValue> {
        match &self.kind {
            AppErrorKind::Domain(DomainError::AuthenticationRequired { login_url }) => {
                Some(serde_json::json!({ "login_url": login_url }))
            }
            AppErrorKind::Validation(ValidationError::MissingPaymentInfo { field }) => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::OrderNotCompleted { .. }),
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::OrderStore { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            // Provisioning is payment-linked: the user is sent to support, not to retry.
            AppErrorKind::External(err) => match err {
                ExternalError::Provisioning { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from specific error types

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let kind = match err {
            StoreError::NotFound { order_id } => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_id })
            }
            other => AppErrorKind::Infrastructure(InfrastructureError::OrderStore {
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            }),
        };
        AppError::new(kind)
    }
}

impl From<ProvisioningError> for AppError {
    fn from(err: ProvisioningError) -> Self {
        let user_message = err.user_message();
        let kind = if err.is_timeout() {
            AppErrorKind::External(ExternalError::Timeout {
                service: "provisioning".to_string(),
                user_message,
            })
        } else {
            AppErrorKind::External(ExternalError::Provisioning {
                message: err.to_string(),
                user_message,
                is_retryable: false,
            })
        };
        AppError::new(kind)
    }
}

impl From<FailureReason> for AppError {
    fn from(reason: FailureReason) -> Self {
        let user_message = reason.user_message();
        let kind = match reason {
            FailureReason::ProvisioningFailed(e) => {
                AppErrorKind::External(ExternalError::Provisioning {
                    message: e.to_string(),
                    user_message,
                    is_retryable: false,
                })
            }
            unconfirmed @ FailureReason::ProvisioningUnconfirmed(_) => {
                AppErrorKind::External(ExternalError::Provisioning {
                    message: unconfirmed.to_string(),
                    user_message,
                    is_retryable: false,
                })
            }
            FailureReason::ProvisioningTimedOut => AppErrorKind::External(ExternalError::Timeout {
                service: "provisioning".to_string(),
                user_message,
            }),
            FailureReason::OrderStoreUnavailable(e) => {
                AppErrorKind::Infrastructure(InfrastructureError::OrderStore {
                    is_retryable: e.is_retryable(),
                    message: e.to_string(),
                })
            }
            lost @ FailureReason::LeaseLost { .. } => {
                AppErrorKind::External(ExternalError::Provisioning {
                    message: lost.to_string(),
                    user_message,
                    is_retryable: false,
                })
            }
        };
        AppError::new(kind)
    }
}

impl From<ReconciliationError> for AppError {
    /// `AuthenticationRequired` carries the return path only; handlers that
    /// know the login URL build the error with [`AppError::authentication_required`].
    fn from(err: ReconciliationError) -> Self {
        match err {
            ReconciliationError::MissingPaymentInfo { field } => AppError::new(
                AppErrorKind::Validation(ValidationError::MissingPaymentInfo {
                    field: field.to_string(),
                }),
            ),
            ReconciliationError::AuthenticationRequired { return_to } => {
                AppError::authentication_required(return_to)
            }
        }
    }
}

impl From<QrError> for AppError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::NotFound(order_id) => {
                AppError::new(AppErrorKind::Domain(DomainError::OrderNotFound { order_id }))
            }
            QrError::Forbidden(order_id) => {
                AppError::new(AppErrorKind::Domain(DomainError::OrderForbidden { order_id }))
            }
            QrError::NotCompleted(order_id) => AppError::new(AppErrorKind::Domain(
                DomainError::OrderNotCompleted { order_id },
            )),
            QrError::Store(e) => e.into(),
            QrError::Provisioning(e) => e.into(),
        }
    }
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        let kind = match err {
            WebhookProcessorError::InvalidSignature | WebhookProcessorError::StaleTimestamp => {
                AppErrorKind::Validation(ValidationError::InvalidSignature {
                    reason: err.to_string(),
                })
            }
            WebhookProcessorError::NotConfigured => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: err.to_string(),
                })
            }
            WebhookProcessorError::InvalidPayload(reason) => {
                AppErrorKind::Validation(ValidationError::InvalidPayload { reason })
            }
            WebhookProcessorError::Store(e) => return e.into(),
            // Duplicates are acknowledged by the handler, never surfaced.
            WebhookProcessorError::AlreadyProcessed => {
                AppErrorKind::Validation(ValidationError::InvalidPayload {
                    reason: err.to_string(),
                })
            }
        };
        AppError::new(kind)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
