//! Order record as held by the order store.
//!
//! Field names follow the order store's JSON contract (camelCase), so the same
//! type is used on the wire and in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Processing state of an order, owned by whichever reconciliation attempt
/// holds the processing lease.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    None,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::None => "none",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Convert from a stored status string. Unknown values are treated as `none`.
    pub fn from_db_status(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "processing" => ProcessingStatus::Processing,
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            _ => ProcessingStatus::None,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One purchase attempt for an eSIM plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub plan_id: String,
    #[serde(default)]
    pub plan_name: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub customer_email: String,

    #[serde(default)]
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub link_used: bool,
    #[serde(default)]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_key: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub remote_order_id: Option<String>,
    #[serde(default)]
    pub order_data: Option<JsonValue>,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub activation_code: Option<String>,
    #[serde(default)]
    pub smdp_address: Option<String>,
    #[serde(default)]
    pub lpa: Option<String>,
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// A fresh record in the `none` state.
    pub fn new(
        order_id: impl Into<String>,
        plan_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        customer_email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: order_id.into(),
            user_id: None,
            plan_id: plan_id.into(),
            plan_name: None,
            amount,
            currency: currency.into(),
            customer_email: customer_email.into(),
            processing_status: ProcessingStatus::None,
            link_used: false,
            processing_started_at: None,
            processing_key: None,
            completed_at: None,
            failed_at: None,
            error_message: None,
            remote_order_id: None,
            order_data: None,
            iccid: None,
            qr_code: None,
            qr_code_url: None,
            activation_code: None,
            smdp_address: None,
            lpa: None,
            status: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Whether activation data the user can scan or type has been attached.
    pub fn has_qr(&self) -> bool {
        non_empty(&self.qr_code) || non_empty(&self.qr_code_url) || non_empty(&self.lpa)
    }

    /// A `processing` lease that started before `stale_before` may be reclaimed.
    pub fn lease_is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.processing_status == ProcessingStatus::Processing
            && self
                .processing_started_at
                .map(|started| started < stale_before)
                .unwrap_or(true)
    }

    /// Whether a new attempt may take the processing lease on this record.
    pub fn is_claimable(&self, stale_before: DateTime<Utc>) -> bool {
        if self.link_used {
            return false;
        }
        match self.processing_status {
            ProcessingStatus::None | ProcessingStatus::Failed => true,
            ProcessingStatus::Processing => self.lease_is_stale(stale_before),
            ProcessingStatus::Completed => false,
        }
    }

    /// Merge the set fields of `patch` into this record.
    pub fn apply(&mut self, patch: &OrderPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = &patch.$field {
                        self.$field = Some(value.clone());
                    }
                )*
            };
        }

        if let Some(status) = patch.processing_status {
            self.processing_status = status;
        }
        if let Some(link_used) = patch.link_used {
            self.link_used = link_used;
        }
        if let Some(plan_name) = &patch.plan_name {
            self.plan_name = Some(plan_name.clone());
        }
        if let Some(user_id) = &patch.user_id {
            self.user_id = Some(user_id.clone());
        }
        merge!(
            processing_started_at,
            processing_key,
            completed_at,
            failed_at,
            error_message,
            remote_order_id,
            order_data,
            iccid,
            qr_code,
            qr_code_url,
            activation_code,
            smdp_address,
            lpa,
            status,
        );
        self.updated_at = Some(Utc::now());
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Partial update of an order. Only `Some` fields are sent and applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smdp_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lpa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl OrderPatch {
    /// Fields written when an attempt takes the processing lease.
    pub fn claim(lease: &Lease) -> Self {
        Self {
            processing_status: Some(ProcessingStatus::Processing),
            processing_started_at: Some(lease.started_at),
            processing_key: Some(lease.key.clone()),
            ..Default::default()
        }
    }
}

/// Temporary ownership of an order's reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub started_at: DateTime<Utc>,
}

impl Lease {
    /// `"{user}:{order}:{unix millis}"`
    pub fn new(user_id: &str, order_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            key: format!("{}:{}:{}", user_id, order_id, started_at.timestamp_millis()),
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Order {
        Order::new("plan-1-1700000000-1", "plan-1", 10, "usd", "a@b.com")
    }

    #[test]
    fn processing_status_serializes_lowercase() {
        let json = serde_json::to_string(&ProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(ProcessingStatus::from_db_status("COMPLETED"), ProcessingStatus::Completed);
        assert_eq!(ProcessingStatus::from_db_status("weird"), ProcessingStatus::None);
    }

    #[test]
    fn order_deserializes_with_missing_processing_fields() {
        let json = serde_json::json!({
            "orderId": "abc-1700000000",
            "planId": "abc",
            "amount": 10,
            "currency": "usd",
            "customerEmail": "a@b.com"
        });
        let order: Order = serde_json::from_value(json).unwrap();
        assert_eq!(order.processing_status, ProcessingStatus::None);
        assert!(!order.link_used);
        assert!(!order.has_qr());
    }

    #[test]
    fn claimability_follows_status_and_staleness() {
        let now = Utc::now();
        let stale_before = now - Duration::minutes(15);

        let mut order = sample();
        assert!(order.is_claimable(stale_before));

        order.processing_status = ProcessingStatus::Processing;
        order.processing_started_at = Some(now - Duration::minutes(1));
        assert!(!order.is_claimable(stale_before));

        order.processing_started_at = Some(now - Duration::minutes(30));
        assert!(order.is_claimable(stale_before));

        order.processing_status = ProcessingStatus::Completed;
        assert!(!order.is_claimable(stale_before));

        order.processing_status = ProcessingStatus::Failed;
        assert!(order.is_claimable(stale_before));

        order.link_used = true;
        assert!(!order.is_claimable(stale_before));
    }

    #[test]
    fn apply_merges_only_set_fields() {
        let mut order = sample();
        order.iccid = Some("8901".to_string());

        order.apply(&OrderPatch {
            processing_status: Some(ProcessingStatus::Completed),
            qr_code: Some("LPA:1$smdp$code".to_string()),
            ..Default::default()
        });

        assert_eq!(order.processing_status, ProcessingStatus::Completed);
        assert_eq!(order.iccid.as_deref(), Some("8901"));
        assert!(order.has_qr());
    }

    #[test]
    fn patch_skips_unset_fields_on_the_wire() {
        let patch = OrderPatch {
            link_used: Some(true),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({ "linkUsed": true })
        );
    }

    #[test]
    fn lease_key_combines_user_order_and_time() {
        let started = chrono::DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let lease = Lease::new("user-1", "order-9", started);
        assert_eq!(lease.key, "user-1:order-9:1700000000123");
    }
}
