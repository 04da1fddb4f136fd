//! Parameters carried by the payment gateway's return redirect.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use serde::Deserialize;
use std::str::FromStr;

pub const DEFAULT_CURRENCY: &str = "usd";

/// Query string appended by the payment service to the configured return URL.
///
/// The gateway has used both `order_id` and `order` for the identifier.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RedirectParams {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub total: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Redirect parameters after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentInfo {
    pub order_id: String,
    pub plan_id: String,
    pub email: String,
    /// Rounded currency amount.
    pub amount: i64,
    pub currency: String,
    pub name: Option<String>,
}

/// A required redirect field was absent or malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing or invalid payment field: {field}")]
pub struct MissingField {
    pub field: &'static str,
}

impl RedirectParams {
    fn order_identifier(&self) -> Option<&str> {
        self.order_id
            .as_deref()
            .or(self.order.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Validate the redirect without touching the network.
    pub fn validate(&self) -> Result<PaymentInfo, MissingField> {
        let order_id = self
            .order_identifier()
            .ok_or(MissingField { field: "order_id" })?
            .to_string();

        let email = self
            .email
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.contains('@'))
            .ok_or(MissingField { field: "email" })?
            .to_string();

        let amount = self
            .total
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| BigDecimal::from_str(v).ok())
            .filter(|v| *v > BigDecimal::zero())
            .and_then(|v| v.round(0).to_i64())
            .ok_or(MissingField { field: "amount" })?;

        let currency = self
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_CURRENCY)
            .to_lowercase();

        let plan_id = self
            .plan_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| extract_plan_id(&order_id));

        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(PaymentInfo {
            order_id,
            plan_id,
            email,
            amount,
            currency,
            name,
        })
    }

    /// The parameters as query pairs, in gateway order, omitting absent ones.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(order_id) = self.order_identifier() {
            pairs.push(("order_id", order_id.to_string()));
        }
        let optional = [
            ("plan_id", &self.plan_id),
            ("email", &self.email),
            ("total", &self.total),
            ("currency", &self.currency),
            ("name", &self.name),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                pairs.push((key, value.clone()));
            }
        }
        pairs
    }
}

/// Recover the plan id from an order id built as `{planId}-{timestamp}-{random}`.
///
/// Everything before the first all-digit `-` segment is the plan id. When there
/// is no such segment, or the order id starts with one, the whole order id is
/// returned.
pub fn extract_plan_id(order_id: &str) -> String {
    let parts: Vec<&str> = order_id.split('-').collect();
    let timestamp_at = parts
        .iter()
        .position(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));

    match timestamp_at {
        Some(index) if index > 0 => parts[..index].join("-"),
        _ => order_id.to_string(),
    }
}
