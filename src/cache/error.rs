//! Redis errors. Callers treat every variant as "cache unavailable".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid Redis URL: {0}")]
    InvalidUrl(redis::RedisError),

    #[error("Redis pool unavailable: {0}")]
    Pool(String),

    #[error("Redis command failed: {0}")]
    Command(#[from] redis::RedisError),
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::User(e) => CacheError::Command(e),
            bb8::RunError::TimedOut => {
                CacheError::Pool("timed out waiting for a connection".to_string())
            }
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
