use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::OrderPatch;

/// Body of `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub plan_id: String,
    pub quantity: u32,
    pub recipient_email: String,
    pub description: String,
    /// `test` or `live`.
    pub mode: String,
}

/// Result of a successful order creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrderResponse {
    pub remote_order_id: String,
    /// Raw provisioning payload, stored verbatim on the order.
    pub order_data: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawCreateOrderResponse {
    #[serde(default)]
    pub remote_order_id: Option<JsonValue>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub order_data: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Activation material for an issued eSIM profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeData {
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub activation_code: Option<String>,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub lpa: Option<String>,
    #[serde(default)]
    pub smdp_address: Option<String>,
}

impl QrCodeData {
    pub fn is_empty(&self) -> bool {
        [
            &self.qr_code,
            &self.activation_code,
            &self.qr_code_url,
            &self.lpa,
        ]
        .iter()
        .all(|field| field.as_deref().map(str::is_empty).unwrap_or(true))
    }

    /// Copy the present fields into `patch`.
    pub fn merge_into(&self, patch: &mut OrderPatch) {
        patch.qr_code = self.qr_code.clone().or(patch.qr_code.take());
        patch.activation_code = self.activation_code.clone().or(patch.activation_code.take());
        patch.iccid = self.iccid.clone().or(patch.iccid.take());
        patch.qr_code_url = self.qr_code_url.clone().or(patch.qr_code_url.take());
        patch.lpa = self.lpa.clone().or(patch.lpa.take());
        patch.smdp_address = self.smdp_address.clone().or(patch.smdp_address.take());
    }
}

/// `GET /orders/{orderId}/qr-code` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawQrResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(flatten)]
    pub data: QrCodeData,
    #[serde(default)]
    pub error: Option<String>,
}

/// Outcome of one QR fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrLookup {
    Ready(QrCodeData),
    /// The profile has not been issued yet; not an error.
    NotReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_order_request_uses_camel_case() {
        let body = serde_json::to_value(CreateOrderRequest {
            plan_id: "kargi-mobile-7days".to_string(),
            quantity: 1,
            recipient_email: "a@b.com".to_string(),
            description: "eSIM order: Kargi 7 Days".to_string(),
            mode: "test".to_string(),
        })
        .unwrap();
        assert_eq!(body["planId"], "kargi-mobile-7days");
        assert_eq!(body["recipientEmail"], "a@b.com");
        assert_eq!(body["quantity"], 1);
    }

    #[test]
    fn qr_response_flattens_fields() {
        let raw: RawQrResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "qrCode": "LPA:1$smdp.io$ABC",
            "iccid": "8901",
            "smdpAddress": "smdp.io"
        }))
        .unwrap();
        assert!(raw.success);
        assert_eq!(raw.data.iccid.as_deref(), Some("8901"));
        assert!(!raw.data.is_empty());
    }

    #[test]
    fn merge_into_keeps_existing_fields() {
        let mut patch = OrderPatch {
            iccid: Some("8901".to_string()),
            ..Default::default()
        };
        QrCodeData {
            qr_code: Some("LPA:1$a$b".to_string()),
            ..Default::default()
        }
        .merge_into(&mut patch);
        assert_eq!(patch.iccid.as_deref(), Some("8901"));
        assert_eq!(patch.qr_code.as_deref(), Some("LPA:1$a$b"));
    }

    #[test]
    fn iccid_alone_is_not_activation_data() {
        let data = QrCodeData {
            iccid: Some("8901".to_string()),
            ..Default::default()
        };
        assert!(data.is_empty());
    }
}
