//! Owner-only order endpoints.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use tracing::info;

use super::payment_success::{with_request_id, OrderSummary};
use super::state::AppState;
use crate::error::{AppError, AppResult};
use crate::identity::login_redirect_url;
use crate::middleware::error::get_request_id_from_headers;

#[derive(Debug, Clone, Serialize)]
pub struct QrResponse {
    pub qr_ready: bool,
    pub order: OrderSummary,
}

/// GET /api/orders/{order_id}/qr
pub async fn refresh_qr(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<QrResponse>> {
    let request_id = get_request_id_from_headers(&headers);

    let Some(principal) = state.principal(&headers).await else {
        let dashboard = &state.orchestrator.config().dashboard_path;
        return Err(with_request_id(
            AppError::authentication_required(login_redirect_url(&state.login_url, dashboard)),
            request_id,
        ));
    };

    let refreshed = state
        .qr
        .refresh(&order_id, &principal)
        .await
        .map_err(|e| with_request_id(e.into(), request_id))?;

    info!(order_id = %order_id, qr_ready = refreshed.qr_ready, "QR refresh served");

    let country = state
        .orchestrator
        .plan_catalog()
        .get(&refreshed.order.plan_id)
        .and_then(|plan| plan.country_name.clone());

    Ok(Json(QrResponse {
        qr_ready: refreshed.qr_ready,
        order: OrderSummary::new(&refreshed.order, country),
    }))
}
