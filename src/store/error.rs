use thiserror::Error;

use crate::http_client::HttpError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("order store timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("order store unreachable: {message}")]
    Unavailable { message: String },

    #[error("order store returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("invalid order store response: {message}")]
    InvalidResponse { message: String },

    #[error("database error: {message}")]
    Database { message: String },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => false,
            StoreError::Timeout { .. } => true,
            StoreError::Unavailable { .. } => true,
            StoreError::Upstream { status, .. } => *status >= 500,
            StoreError::InvalidResponse { .. } => false,
            StoreError::Database { .. } => true,
        }
    }
}

impl From<HttpError> for StoreError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout { timeout_secs } => StoreError::Timeout { timeout_secs },
            HttpError::Network { message } | HttpError::Init { message } => {
                StoreError::Unavailable { message }
            }
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout { timeout_secs: 0 },
            other => StoreError::Database {
                message: other.to_string(),
            },
        }
    }
}
