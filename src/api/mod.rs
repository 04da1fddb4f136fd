//! HTTP surface

pub mod orders;
pub mod payment_success;
pub mod state;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
pub use state::AppState;

/// Build the application router with request-id and logging layers.
pub fn router(state: AppState) -> Router {
    let success_path = state.orchestrator.config().success_path.clone();

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route(&success_path, get(payment_success::payment_success))
        .route("/api/orders/{order_id}/qr", get(orders::refresh_qr))
        .route("/webhooks/payments", post(webhooks::handle_payment_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn root() -> &'static str {
    "Roamjet reconciliation service"
}

/// Liveness: the process is up and serving.
async fn liveness() -> StatusCode {
    StatusCode::OK
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() || status.status == crate::health::HealthState::Degraded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
