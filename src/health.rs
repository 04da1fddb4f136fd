//! Health check module
//! Provides health status for the service and the collaborators it depends on

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};
#[cfg(feature = "cache")]
use tracing::warn;

use crate::provisioning::ProvisioningApi;
use crate::store::OrderStore;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

type ProbeResult = Result<u128, String>;

/// Health checker for the service
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn OrderStore>,
    provisioning: Arc<dyn ProvisioningApi>,
    #[cfg(feature = "cache")]
    cache: Option<crate::cache::RedisPool>,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn OrderStore>, provisioning: Arc<dyn ProvisioningApi>) -> Self {
        Self {
            store,
            provisioning,
            #[cfg(feature = "cache")]
            cache: None,
            probe_timeout: Duration::from_secs(5),
        }
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, pool: crate::cache::RedisPool) -> Self {
        self.cache = Some(pool);
        self
    }

    /// Probe every collaborator concurrently.
    ///
    /// The order store and provisioning API are required. Redis only backs
    /// the attempt guard, so losing it degrades the service instead of
    /// failing it.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let (store, provisioning) = futures::join!(
            self.probe(check_store_health(self.store.as_ref())),
            self.probe(check_provisioning_health(self.provisioning.as_ref())),
        );

        let mut overall_healthy = true;
        for (name, result) in [("order_store", store), ("provisioning", provisioning)] {
            match result {
                Ok(response_time) => {
                    info!("{} health check: OK ({}ms)", name, response_time);
                    health_status
                        .checks
                        .insert(name.to_string(), ComponentHealth::up(Some(response_time)));
                }
                Err(e) => {
                    error!("{} health check failed: {}", name, e);
                    overall_healthy = false;
                    health_status
                        .checks
                        .insert(name.to_string(), ComponentHealth::down(Some(e)));
                }
            }
        }

        let degraded = self.check_cache(&mut health_status).await;

        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }

    /// Returns true when the cache is configured but unreachable.
    #[cfg(feature = "cache")]
    async fn check_cache(&self, health_status: &mut HealthStatus) -> bool {
        let Some(pool) = &self.cache else {
            return false;
        };
        match self.probe(check_cache_health(pool)).await {
            Ok(response_time) => {
                health_status
                    .checks
                    .insert("cache".to_string(), ComponentHealth::up(Some(response_time)));
                false
            }
            Err(e) => {
                warn!("Cache health check failed: {}", e);
                health_status
                    .checks
                    .insert("cache".to_string(), ComponentHealth::warning(None, Some(e)));
                true
            }
        }
    }

    #[cfg(not(feature = "cache"))]
    async fn check_cache(&self, _health_status: &mut HealthStatus) -> bool {
        false
    }

    async fn probe<F>(&self, check: F) -> ProbeResult
    where
        F: std::future::Future<Output = ProbeResult>,
    {
        match timeout(self.probe_timeout, check).await {
            Ok(result) => result,
            Err(_) => Err("Timeout".to_string()),
        }
    }
}

pub async fn check_store_health(store: &dyn OrderStore) -> ProbeResult {
    let start = Instant::now();
    store
        .health_check()
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| format!("{}: {}", store.name(), e))
}

pub async fn check_provisioning_health(provisioning: &dyn ProvisioningApi) -> ProbeResult {
    let start = Instant::now();
    provisioning
        .health_check()
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| format!("{}: {}", provisioning.name(), e))
}

#[cfg(feature = "cache")]
pub async fn check_cache_health(pool: &crate::cache::RedisPool) -> ProbeResult {
    let start = Instant::now();
    crate::cache::health_check(pool)
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{
        CreateOrderRequest, CreateOrderResponse, ProvisioningError, ProvisioningResult, QrLookup,
    };
    use crate::store::InMemoryOrderStore;
    use async_trait::async_trait;

    struct DownProvisioning;

    #[async_trait]
    impl ProvisioningApi for DownProvisioning {
        async fn create_order(
            &self,
            _request: &CreateOrderRequest,
        ) -> ProvisioningResult<CreateOrderResponse> {
            unreachable!()
        }

        async fn fetch_qr_code(&self, _order_id: &str) -> ProvisioningResult<QrLookup> {
            unreachable!()
        }

        async fn health_check(&self) -> ProvisioningResult<()> {
            Err(ProvisioningError::Network {
                message: "connection refused".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "down"
        }
    }

    #[test]
    fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(health_status.is_healthy());
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert_eq!(up_health.status, ComponentState::Up);
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert_eq!(down_health.status, ComponentState::Down);
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert_eq!(warning_health.status, ComponentState::Warning);
    }

    #[tokio::test]
    async fn unreachable_provisioning_makes_service_unhealthy() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(DownProvisioning),
        );
        let status = checker.check_health().await;

        assert_eq!(status.status, HealthState::Unhealthy);
        assert_eq!(status.checks["order_store"].status, ComponentState::Up);
        let provisioning = &status.checks["provisioning"];
        assert_eq!(provisioning.status, ComponentState::Down);
        assert!(provisioning
            .details
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }
}
