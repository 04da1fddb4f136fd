//! Payment microservice webhooks.
//!
//! Signature header: `x-roamjet-signature: t=<unix seconds>,v1=<hex>` where the
//! MAC is HMAC-SHA256 over `"{t}.{raw body}"`.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{extract_plan_id, Order, OrderPatch, RedirectParams};
use crate::store::{OrderStore, StoreError, WriteCondition, WriteOutcome};

pub const SIGNATURE_HEADER: &str = "x-roamjet-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Signature timestamp outside tolerance")]
    StaleTimestamp,
    #[error("Webhook secret not configured")]
    NotConfigured,
    #[error("Already processed")]
    AlreadyProcessed,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Order store error: {0}")]
    Store(#[from] StoreError),
}

/// What a delivery changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    OrderRecorded { order_id: String },
    LinkMarkedUsed { order_id: String },
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutData {
    #[serde(default, alias = "order_id")]
    order_id: Option<String>,
    #[serde(default, alias = "plan_id")]
    plan_id: Option<String>,
    #[serde(default, alias = "customerEmail")]
    email: Option<String>,
    #[serde(default)]
    amount: Option<JsonValue>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

fn amount_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Placeholder record for a refund that arrived before anything else knew the
/// order. Payment fields are kept when the event carries them.
fn refunded_order(order_id: &str, data: CheckoutData) -> Order {
    let params = RedirectParams {
        order_id: Some(order_id.to_string()),
        plan_id: data.plan_id,
        email: data.email,
        total: data.amount.as_ref().and_then(amount_text),
        currency: data.currency,
        name: data.name,
        ..Default::default()
    };
    let mut order = match params.validate() {
        Ok(info) => {
            let mut order = Order::new(order_id, info.plan_id, info.amount, info.currency, info.email);
            order.plan_name = info.name;
            order
        }
        Err(_) => Order::new(
            order_id,
            extract_plan_id(order_id),
            0,
            params.currency.as_deref().unwrap_or("usd").to_lowercase(),
            params.email.unwrap_or_default(),
        ),
    };
    order.user_id = data.user_id;
    order.link_used = true;
    order
}

pub struct WebhookProcessor {
    store: Arc<dyn OrderStore>,
    secret: Option<String>,
    tolerance: Duration,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn OrderStore>, secret: Option<String>, tolerance: Duration) -> Self {
        Self {
            store,
            secret,
            tolerance,
        }
    }

    pub async fn process_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookAction, WebhookProcessorError> {
        let signature = signature.ok_or(WebhookProcessorError::InvalidSignature)?;
        self.verify_signature(payload, signature, Utc::now().timestamp())?;

        let envelope: WebhookEnvelope = serde_json::from_slice(payload)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;
        let event_id = envelope.id.as_deref().unwrap_or("-");

        match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                info!(event_id = %event_id, "Processing checkout completion webhook");
                self.record_order(envelope.data).await
            }
            "charge.refunded" => {
                info!(event_id = %event_id, "Processing refund webhook");
                self.mark_link_used(envelope.data).await
            }
            other => {
                warn!(event_id = %event_id, event_type = %other, "Unhandled webhook event type");
                Ok(WebhookAction::Ignored {
                    event_type: other.to_string(),
                })
            }
        }
    }

    /// Check `t=<unix>,v1=<hex>` against the configured secret at `now`.
    pub fn verify_signature(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<(), WebhookProcessorError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or(WebhookProcessorError::NotConfigured)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookProcessorError::InvalidSignature)?;
        if signatures.is_empty() {
            return Err(WebhookProcessorError::InvalidSignature);
        }
        if (now - timestamp).unsigned_abs() > self.tolerance.as_secs() {
            return Err(WebhookProcessorError::StaleTimestamp);
        }

        let expected = sign(secret, timestamp, payload);
        if signatures
            .iter()
            .any(|candidate| secure_eq(expected.as_bytes(), candidate.trim().as_bytes()))
        {
            Ok(())
        } else {
            Err(WebhookProcessorError::InvalidSignature)
        }
    }

    async fn record_order(&self, data: JsonValue) -> Result<WebhookAction, WebhookProcessorError> {
        let data: CheckoutData = serde_json::from_value(data)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        let params = RedirectParams {
            order_id: data.order_id,
            plan_id: data.plan_id,
            email: data.email,
            total: data.amount.as_ref().and_then(amount_text),
            currency: data.currency,
            name: data.name,
            ..Default::default()
        };
        let info = params
            .validate()
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        let mut order = Order::new(
            info.order_id.clone(),
            info.plan_id,
            info.amount,
            info.currency,
            info.email,
        );
        order.user_id = data.user_id;
        order.plan_name = info.name;

        match self.store.insert(&order).await? {
            WriteOutcome::Applied(_) => {
                info!(order_id = %info.order_id, "Order recorded from checkout webhook");
                Ok(WebhookAction::OrderRecorded {
                    order_id: info.order_id,
                })
            }
            WriteOutcome::ConditionFailed => Err(WebhookProcessorError::AlreadyProcessed),
        }
    }

    async fn mark_link_used(&self, data: JsonValue) -> Result<WebhookAction, WebhookProcessorError> {
        let data: CheckoutData = serde_json::from_value(data)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;
        let order_id = data
            .order_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| WebhookProcessorError::InvalidPayload("missing orderId".to_string()))?;

        match self.store.get(&order_id).await? {
            Some(order) if order.link_used => return Err(WebhookProcessorError::AlreadyProcessed),
            Some(_) => {}
            None => {
                // A refund can beat the redirect; the record it leaves blocks provisioning.
                let order = refunded_order(&order_id, data);
                if let WriteOutcome::Applied(_) = self.store.insert(&order).await? {
                    info!(order_id = %order_id, "Refund recorded before order existed, link marked used");
                    return Ok(WebhookAction::LinkMarkedUsed { order_id });
                }
            }
        }

        let patch = OrderPatch {
            link_used: Some(true),
            ..Default::default()
        };
        self.store
            .update(&order_id, &patch, &WriteCondition::Unconditional)
            .await?;
        info!(order_id = %order_id, "Payment link marked used after refund");
        Ok(WebhookAction::LinkMarkedUsed { order_id })
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
