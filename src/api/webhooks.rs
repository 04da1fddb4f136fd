use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use super::payment_success::with_request_id;
use super::state::AppState;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::webhook_processor::{WebhookAction, WebhookProcessorError, SIGNATURE_HEADER};

/// POST /webhooks/payments
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if signature.is_none() {
        warn!("Missing webhook signature");
    }

    match state.webhooks.process_webhook(signature, &body).await {
        Ok(action) => {
            match &action {
                WebhookAction::OrderRecorded { order_id } => {
                    info!(order_id = %order_id, "Webhook recorded order")
                }
                WebhookAction::LinkMarkedUsed { order_id } => {
                    info!(order_id = %order_id, "Webhook marked payment link used")
                }
                WebhookAction::Ignored { event_type } => {
                    info!(event_type = %event_type, "Webhook acknowledged without action")
                }
            }
            (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
        }
        Err(WebhookProcessorError::AlreadyProcessed) => {
            info!("Webhook already processed");
            (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
        }
        Err(e) => {
            let request_id = get_request_id_from_headers(&headers);
            with_request_id(AppError::from(e), request_id).into_response()
        }
    }
}
