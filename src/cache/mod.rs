//! Redis connection pool backing the attempt guard.
//!
//! Redis is an optimisation here, never a dependency of correctness: when it is
//! unavailable the guard lets attempts through and the order store's
//! conditional claim decides.

pub mod error;
pub mod keys;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{error, info, warn};

pub use error::{CacheError, CacheResult};

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Pool settings
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub redis_url: String,
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl PoolSettings {
    pub fn new(redis_url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            redis_url: redis_url.into(),
            max_connections,
            min_idle: 1,
            connection_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Initialize the Redis pool. A failed initial PING is logged, not fatal.
pub async fn init_cache_pool(settings: PoolSettings) -> CacheResult<RedisPool> {
    info!(
        max_connections = settings.max_connections,
        "initializing Redis pool"
    );

    let manager = RedisConnectionManager::new(settings.redis_url.clone()).map_err(|e| {
        error!(error = %e, "failed to create Redis connection manager");
        CacheError::InvalidUrl(e)
    })?;

    let pool = Pool::builder()
        .max_size(settings.max_connections)
        .min_idle(settings.min_idle)
        .connection_timeout(settings.connection_timeout)
        .idle_timeout(settings.idle_timeout)
        .test_on_check_out(false)
        .build(manager)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to build Redis pool");
            CacheError::Pool(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        warn!(error = %e, "initial Redis PING failed, continuing without it");
    }

    Ok(pool)
}

/// PING through the pool.
pub async fn health_check(pool: &RedisPool) -> CacheResult<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}
