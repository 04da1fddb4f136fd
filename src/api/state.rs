use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::Principal;
use crate::health::HealthChecker;
use crate::identity::{resolve_principal, IdentityProvider};
use crate::services::qr::QrService;
use crate::services::webhook_processor::WebhookProcessor;
use crate::services::ReconciliationOrchestrator;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ReconciliationOrchestrator>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Upper bound on principal resolution per request.
    pub identity_timeout: Duration,
    pub login_url: String,
    pub qr: Arc<QrService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub health: HealthChecker,
}

impl AppState {
    /// The signed-in user behind the request's bearer token, if any.
    pub async fn principal(&self, headers: &HeaderMap) -> Option<Principal> {
        resolve_principal(
            self.identity.as_ref(),
            bearer_token(headers),
            self.identity_timeout,
        )
        .await
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
}
