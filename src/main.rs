use roamjet_backend::api::{self, AppState};
use roamjet_backend::config::{AppConfig, OrderStoreBackend};
use roamjet_backend::health::HealthChecker;
use roamjet_backend::http_client::ApiHttpClient;
use roamjet_backend::identity::HttpIdentityProvider;
use roamjet_backend::logging::init_tracing_with;
use roamjet_backend::provisioning::{HttpProvisioningClient, ProvisioningApi};
use roamjet_backend::services::attempt_guard::{AttemptGuard, InMemoryAttemptGuard};
use roamjet_backend::services::audit::{AuditLog, AuditSink, HttpAuditSink, TracingAuditSink};
use roamjet_backend::services::plan_catalog::PlanCatalog;
use roamjet_backend::services::qr::QrService;
use roamjet_backend::services::webhook_processor::WebhookProcessor;
use roamjet_backend::services::ReconciliationOrchestrator;
use roamjet_backend::store::{HttpOrderStore, InMemoryOrderStore, OrderStore};
use roamjet_backend::workers::qr_backfill::{QrBackfillConfig, QrBackfillWorker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

async fn build_order_store(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    let store: Arc<dyn OrderStore> = match config.order_store.backend {
        OrderStoreBackend::Http => Arc::new(HttpOrderStore::new(&config.order_store)?),
        OrderStoreBackend::Memory => {
            warn!("⚠️  Using in-memory order store; orders are lost on restart");
            Arc::new(InMemoryOrderStore::new())
        }
        #[cfg(feature = "database")]
        OrderStoreBackend::Postgres => {
            let database_url = config
                .order_store
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL not set"))?;
            info!("📊 Connecting Postgres order store...");
            Arc::new(
                roamjet_backend::store::PgOrderStore::connect(
                    database_url,
                    config.order_store.max_connections,
                )
                .await?,
            )
        }
        #[cfg(not(feature = "database"))]
        OrderStoreBackend::Postgres => {
            anyhow::bail!("ORDER_STORE_BACKEND=postgres requires the `database` feature")
        }
    };

    info!(store = store.name(), "✅ Order store initialized");
    Ok(store)
}

#[cfg(feature = "cache")]
async fn build_attempt_guard(
    config: &AppConfig,
    health: &mut HealthChecker,
) -> Arc<dyn AttemptGuard> {
    use roamjet_backend::cache::{init_cache_pool, PoolSettings};
    use roamjet_backend::services::attempt_guard::RedisAttemptGuard;

    let ttl = Duration::from_secs(config.cache.guard_ttl_secs);
    let Some(redis_url) = config.cache.redis_url.as_deref() else {
        info!("⏭️  REDIS_URL not set, using in-process attempt guard");
        return Arc::new(InMemoryAttemptGuard::new(ttl));
    };

    match init_cache_pool(PoolSettings::new(redis_url, config.cache.max_connections)).await {
        Ok(pool) => {
            info!("✅ Redis attempt guard initialized");
            *health = health.clone().with_cache(pool.clone());
            Arc::new(RedisAttemptGuard::new(pool, ttl))
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, using in-process attempt guard");
            Arc::new(InMemoryAttemptGuard::new(ttl))
        }
    }
}

#[cfg(not(feature = "cache"))]
async fn build_attempt_guard(
    config: &AppConfig,
    _health: &mut HealthChecker,
) -> Arc<dyn AttemptGuard> {
    Arc::new(InMemoryAttemptGuard::new(Duration::from_secs(
        config.cache.guard_ttl_secs,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing_with(&config.logging);
    config.validate().map_err(|e| {
        error!(error = %e, "❌ Invalid configuration");
        e
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        payment_mode = config.reconcile.payment_mode.as_str(),
        "🚀 Starting Roamjet reconciliation service"
    );

    let store = build_order_store(&config).await?;
    let provisioning: Arc<dyn ProvisioningApi> =
        Arc::new(HttpProvisioningClient::new(&config.provisioning)?);
    let identity = Arc::new(HttpIdentityProvider::new(&config.identity)?);

    let catalog = Arc::new(PlanCatalog::load(&config.reconcile.plan_catalog_path)?);
    info!(plans = catalog.len(), "✅ Plan catalog loaded");

    let mut health = HealthChecker::new(store.clone(), provisioning.clone());
    let guard = build_attempt_guard(&config, &mut health).await;

    let audit_sink: Arc<dyn AuditSink> = match config.order_store.backend {
        OrderStoreBackend::Http => Arc::new(HttpAuditSink::new(
            &config.order_store.base_url,
            ApiHttpClient::new(
                config.order_store.timeout(),
                0,
                config.order_store.api_key.clone(),
            )?,
        )),
        _ => Arc::new(TracingAuditSink),
    };
    let (audit_log, audit_handle) = AuditLog::spawn(audit_sink, config.reconcile.audit_buffer);

    let (backfill_tx, backfill_rx) = mpsc::channel(config.reconcile.qr_backfill_queue);
    let qr = Arc::new(QrService::new(store.clone(), provisioning.clone()));

    let orchestrator = Arc::new(
        ReconciliationOrchestrator::new(store.clone(), provisioning, config.reconcile.clone())
            .with_plan_catalog(catalog)
            .with_attempt_guard(guard)
            .with_audit_log(audit_log)
            .with_qr_backfill(backfill_tx),
    );

    if config.webhook.secret.is_none() {
        warn!("⚠️  PAYMENT_WEBHOOK_SECRET not set; payment webhooks will be rejected");
    }
    let webhooks = Arc::new(WebhookProcessor::new(
        store,
        config.webhook.secret.clone(),
        Duration::from_secs(config.webhook.tolerance_secs),
    ));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let backfill = QrBackfillWorker::new(
        qr.clone(),
        backfill_rx,
        QrBackfillConfig::from(&config.reconcile),
    );
    let backfill_handle = tokio::spawn(backfill.run(worker_shutdown_rx));
    info!("✅ QR backfill worker started");

    let app = api::router(AppState {
        orchestrator,
        identity,
        identity_timeout: config.identity.timeout(),
        login_url: config.identity.login_url.clone(),
        qr,
        webhooks,
        health,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, success_path = %config.reconcile.success_path, "🌐 Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), backfill_handle)
        .await
        .is_err()
    {
        error!("Timed out waiting for QR backfill worker shutdown");
    }
    // The router held the last audit senders; the drain task ends on its own.
    if tokio::time::timeout(Duration::from_secs(5), audit_handle)
        .await
        .is_err()
    {
        warn!("Timed out flushing audit log");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
