//! JSON error bodies.
//!
//! Every failure leaves the API with the same shape so the checkout page and
//! support tooling can branch on `error` codes rather than on messages.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    /// Safe to show to the purchaser.
    pub message: String,
    /// Quote this to support.
    pub request_id: Option<String>,
    /// RFC 3339.
    pub timestamp: String,
    /// `login_url` for sign-in redirects, `field` for missing payment data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            error: err.error_code(),
            message: err.user_message(),
            request_id: err.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: err.details(),
            retryable: Some(err.is_retryable()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from(&self);

        match status {
            s if s.is_server_error() => error!(
                code = ?body.error,
                status = s.as_u16(),
                request_id = ?body.request_id,
                context = ?self.context,
                error = ?self.kind,
                "request failed"
            ),
            // Sign-in redirects are expected traffic.
            StatusCode::UNAUTHORIZED if body.error == ErrorCode::AuthenticationRequired => {}
            s => warn!(
                code = ?body.error,
                status = s.as_u16(),
                request_id = ?body.request_id,
                error = ?self.kind,
                "request rejected"
            ),
        }

        (status, Json(body)).into_response()
    }
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppErrorKind, DomainError};
    use crate::services::reconciliation::ReconciliationError;

    #[test]
    fn body_carries_code_and_request_id() {
        let err = AppError::new(AppErrorKind::Domain(DomainError::OrderNotFound {
            order_id: "kargi-1700000000-1".to_string(),
        }))
        .with_request_id("req_123");

        let body = ErrorResponse::from(&err);

        assert_eq!(body.error, ErrorCode::OrderNotFound);
        assert_eq!(body.request_id.as_deref(), Some("req_123"));
        assert!(body.message.contains("kargi-1700000000-1"));
        assert_eq!(body.retryable, Some(false));
    }

    #[test]
    fn missing_payment_info_is_bad_request() {
        let err: AppError = ReconciliationError::MissingPaymentInfo { field: "email" }.into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn sign_in_redirect_is_unauthorized() {
        let err = AppError::authentication_required("/login?returnUrl=%2Fdashboard");
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn request_id_header_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(get_request_id_from_headers(&headers), None);
        headers.insert(REQUEST_ID_HEADER, "abc".parse().unwrap());
        assert_eq!(get_request_id_from_headers(&headers).as_deref(), Some("abc"));
    }
}
