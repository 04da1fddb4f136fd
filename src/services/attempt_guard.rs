//! Cheap first-pass short-circuit for duplicate reconciliation attempts.
//!
//! A guard only ever says "someone in this deployment is already on it". It
//! never grants the right to provision; the conditional claim on the order
//! store does. Guards fail open.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait AttemptGuard: Send + Sync {
    /// `false` when another attempt for `order_id` holds the slot.
    async fn try_acquire(&self, order_id: &str) -> bool;

    async fn release(&self, order_id: &str);
}

/// Per-process guard with expiring slots.
pub struct InMemoryAttemptGuard {
    ttl: Duration,
    slots: Mutex<HashMap<String, Instant>>,
}

impl InMemoryAttemptGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AttemptGuard for InMemoryAttemptGuard {
    async fn try_acquire(&self, order_id: &str) -> bool {
        let now = Instant::now();
        let Ok(mut slots) = self.slots.lock() else {
            return true;
        };
        slots.retain(|_, expires| *expires > now);
        if slots.contains_key(order_id) {
            return false;
        }
        slots.insert(order_id.to_string(), now + self.ttl);
        true
    }

    async fn release(&self, order_id: &str) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(order_id);
        }
    }
}

#[cfg(feature = "cache")]
pub use redis_guard::RedisAttemptGuard;

#[cfg(feature = "cache")]
mod redis_guard {
    use super::*;
    use crate::cache::keys::reconcile::AttemptKey;
    use crate::cache::{CacheResult, RedisPool};
    use tracing::warn;

    /// Deployment-wide guard: `SET key 1 NX PX ttl`.
    pub struct RedisAttemptGuard {
        pool: RedisPool,
        ttl: Duration,
    }

    impl RedisAttemptGuard {
        pub fn new(pool: RedisPool, ttl: Duration) -> Self {
            Self { pool, ttl }
        }

        async fn set_nx(&self, key: &str) -> CacheResult<bool> {
            let mut conn = self.pool.get().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg("1")
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut *conn)
                .await?;
            Ok(reply.is_some())
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            let mut conn = self.pool.get().await?;
            let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut *conn).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl AttemptGuard for RedisAttemptGuard {
        async fn try_acquire(&self, order_id: &str) -> bool {
            let key = AttemptKey::new(order_id).to_string();
            match self.set_nx(&key).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "attempt guard unavailable, letting attempt through");
                    true
                }
            }
        }

        async fn release(&self, order_id: &str) {
            let key = AttemptKey::new(order_id).to_string();
            if let Err(e) = self.delete(&key).await {
                warn!(order_id = %order_id, error = %e, "failed to release attempt guard");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let guard = InMemoryAttemptGuard::new(Duration::from_secs(60));
        assert!(guard.try_acquire("o-1").await);
        assert!(!guard.try_acquire("o-1").await);
        assert!(guard.try_acquire("o-2").await);

        guard.release("o-1").await;
        assert!(guard.try_acquire("o-1").await);
    }

    #[tokio::test]
    async fn expired_slots_are_reusable() {
        let guard = InMemoryAttemptGuard::new(Duration::ZERO);
        assert!(guard.try_acquire("o-1").await);
        assert!(guard.try_acquire("o-1").await);
    }
}
