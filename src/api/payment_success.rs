//! `GET /payment/success`: the page the payment gateway redirects back to.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use tracing::info;

use super::state::AppState;
use crate::domain::{Order, RedirectParams};
use crate::error::{AppError, AppResult};
use crate::identity::login_redirect_url;
use crate::logging::mask_email;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::{ReconciliationError, ReconciliationOutcome};

/// What the success page renders.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSuccessView {
    /// One of the outcome labels (`success`, `already_used`, ...).
    pub state: &'static str,
    pub message: String,
    pub redirect_to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub plan_id: String,
    pub plan_name: Option<String>,
    pub country_name: Option<String>,
    pub status: String,
    pub qr_ready: bool,
    pub qr_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub activation_code: Option<String>,
    pub lpa: Option<String>,
    pub smdp_address: Option<String>,
    pub iccid: Option<String>,
}

impl OrderSummary {
    pub(crate) fn new(order: &Order, country_name: Option<String>) -> Self {
        Self {
            order_id: order.order_id.clone(),
            plan_id: order.plan_id.clone(),
            plan_name: order.plan_name.clone(),
            country_name,
            status: order.processing_status.to_string(),
            qr_ready: order.has_qr(),
            qr_code: order.qr_code.clone(),
            qr_code_url: order.qr_code_url.clone(),
            activation_code: order.activation_code.clone(),
            lpa: order.lpa.clone(),
            smdp_address: order.smdp_address.clone(),
            iccid: order.iccid.clone(),
        }
    }
}

fn outcome_message(outcome: &ReconciliationOutcome) -> String {
    match outcome {
        ReconciliationOutcome::Success { qr_ready: true, .. } => {
            "Your eSIM is ready. Scan the QR code to install it.".to_string()
        }
        ReconciliationOutcome::Success { qr_ready: false, .. } => {
            "Your eSIM order is confirmed. The QR code will appear on your dashboard shortly."
                .to_string()
        }
        ReconciliationOutcome::AlreadyUsed => {
            "This payment link has already been used. Your orders are on your dashboard."
                .to_string()
        }
        ReconciliationOutcome::AlreadyProcessing => {
            "Your order is already being processed. Check your dashboard in a moment.".to_string()
        }
        ReconciliationOutcome::AlreadyCompleted { .. } => {
            "This order was already completed. Your eSIM details are below.".to_string()
        }
        ReconciliationOutcome::Failed(reason) => reason.user_message(),
    }
}

/// GET /payment/success
pub async fn payment_success(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RedirectParams>,
) -> AppResult<Json<PaymentSuccessView>> {
    let request_id = get_request_id_from_headers(&headers);
    let principal = state.principal(&headers).await;

    info!(
        order_id = ?params.order_id.as_deref().or(params.order.as_deref()),
        email = ?params.email.as_deref().map(mask_email),
        authenticated = principal.is_some(),
        "Payment success redirect received"
    );

    let outcome = match state
        .orchestrator
        .reconcile(&params, principal.as_ref())
        .await
    {
        Ok(outcome) => outcome,
        Err(ReconciliationError::AuthenticationRequired { return_to }) => {
            let login_url = login_redirect_url(&state.login_url, &return_to);
            return Err(with_request_id(
                AppError::authentication_required(login_url),
                request_id,
            ));
        }
        Err(e) => return Err(with_request_id(e.into(), request_id)),
    };

    let message = outcome_message(&outcome);
    let label = outcome.label();
    let order = outcome.order().map(|order| {
        let country = state
            .orchestrator
            .plan_catalog()
            .get(&order.plan_id)
            .and_then(|plan| plan.country_name.clone());
        OrderSummary::new(order, country)
    });

    if let ReconciliationOutcome::Failed(reason) = outcome {
        return Err(with_request_id(
            AppError::from(reason).with_context(message),
            request_id,
        ));
    }

    Ok(Json(PaymentSuccessView {
        state: label,
        message,
        redirect_to: state.orchestrator.config().dashboard_path.clone(),
        order,
    }))
}

pub(crate) fn with_request_id(error: AppError, request_id: Option<String>) -> AppError {
    match request_id {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}
