//! reqwest client for the eSIM provisioning REST API.
//!
//! * `POST /orders`                 -> `{ success, orderId, orderData?, error? }`
//! * `GET  /orders/{orderId}/qr-code` -> `{ success, qrCode?, activationCode?, iccid?, ... }`

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::config::ProvisioningConfig;
use crate::http_client::{endpoint, path_segment, ApiHttpClient, ApiResponse};
use crate::provisioning::error::{ProvisioningError, ProvisioningResult};
use crate::provisioning::provider::ProvisioningApi;
use crate::provisioning::types::{
    CreateOrderRequest, CreateOrderResponse, QrLookup, RawCreateOrderResponse, RawQrResponse,
};

pub struct HttpProvisioningClient {
    base_url: String,
    http: ApiHttpClient,
}

impl HttpProvisioningClient {
    pub fn new(config: &ProvisioningConfig) -> ProvisioningResult<Self> {
        let http = ApiHttpClient::new(config.timeout(), config.max_retries, config.api_key.clone())?;
        Ok(Self {
            base_url: config.base_url.clone(),
            http,
        })
    }

    fn upstream_error(response: &ApiResponse) -> ProvisioningError {
        // Error bodies usually carry a readable `error`; classify it so rate
        // limits are recognised even behind a 4xx/5xx.
        if let Ok(JsonValue::Object(body)) = serde_json::from_str::<JsonValue>(&response.body) {
            if let Some(message) = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(JsonValue::as_str)
            {
                let code = body.get("code").map(|c| match c {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                });
                return ProvisioningError::from_message(message, code);
            }
        }
        ProvisioningError::Upstream {
            status: response.status.as_u16(),
            message: response.body.chars().take(200).collect(),
        }
    }

    pub(crate) fn parse_create_order(response: &ApiResponse) -> ProvisioningResult<CreateOrderResponse> {
        if !response.status.is_success() {
            return Err(Self::upstream_error(response));
        }

        let order_data: JsonValue =
            serde_json::from_str(&response.body).map_err(|e| ProvisioningError::InvalidResponse {
                message: e.to_string(),
            })?;
        let raw: RawCreateOrderResponse = serde_json::from_value(order_data.clone()).map_err(|e| {
            ProvisioningError::InvalidResponse {
                message: e.to_string(),
            }
        })?;

        if raw.success == Some(false) || raw.error.is_some() {
            let message = raw
                .error
                .or(raw.message)
                .unwrap_or_else(|| "order creation failed".to_string());
            return Err(ProvisioningError::from_message(message, None));
        }

        // The id has shipped as `orderId`, `remoteOrderId` and a numeric `id`.
        let id = raw
            .remote_order_id
            .or_else(|| order_data.get("orderId").cloned())
            .or_else(|| order_data.get("id").cloned());
        let remote_order_id = match id {
            Some(JsonValue::String(id)) if !id.is_empty() => id,
            Some(JsonValue::Number(id)) => id.to_string(),
            _ => {
                return Err(ProvisioningError::InvalidResponse {
                    message: "order creation response carries no order id".to_string(),
                })
            }
        };

        Ok(CreateOrderResponse {
            remote_order_id,
            order_data: raw.order_data.unwrap_or(order_data),
        })
    }

    pub(crate) fn parse_qr_lookup(response: &ApiResponse) -> ProvisioningResult<QrLookup> {
        if response.status == reqwest::StatusCode::NOT_FOUND {
            return Ok(QrLookup::NotReady);
        }
        if !response.status.is_success() {
            return Err(Self::upstream_error(response));
        }

        let raw: RawQrResponse =
            serde_json::from_str(&response.body).map_err(|e| ProvisioningError::InvalidResponse {
                message: e.to_string(),
            })?;

        if !raw.success {
            return match raw.error {
                Some(message) => Err(ProvisioningError::from_message(message, None)),
                None => Ok(QrLookup::NotReady),
            };
        }
        if raw.data.is_empty() {
            return Ok(QrLookup::NotReady);
        }
        Ok(QrLookup::Ready(raw.data))
    }
}

#[async_trait]
impl ProvisioningApi for HttpProvisioningClient {
    async fn create_order(&self, request: &CreateOrderRequest) -> ProvisioningResult<CreateOrderResponse> {
        // Issues an eSIM profile: sent exactly once.
        let response = self
            .http
            .send(
                Method::POST,
                &endpoint(&self.base_url, "orders"),
                Some(request),
                None,
                false,
            )
            .await?;

        match Self::parse_create_order(&response) {
            Ok(created) => {
                info!(
                    plan_id = %request.plan_id,
                    remote_order_id = %created.remote_order_id,
                    mode = %request.mode,
                    "provisioning order created"
                );
                Ok(created)
            }
            Err(e) => {
                warn!(plan_id = %request.plan_id, error = %e, "provisioning order rejected");
                Err(e)
            }
        }
    }

    async fn fetch_qr_code(&self, order_id: &str) -> ProvisioningResult<QrLookup> {
        let url = endpoint(
            &self.base_url,
            &format!("orders/{}/qr-code", path_segment(order_id)),
        );
        let response = self.http.send::<()>(Method::GET, &url, None, None, true).await?;
        Self::parse_qr_lookup(&response)
    }

    async fn health_check(&self) -> ProvisioningResult<()> {
        let response = self
            .http
            .send::<()>(Method::GET, &endpoint(&self.base_url, "health"), None, None, false)
            .await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(Self::upstream_error(&response))
        }
    }

    fn name(&self) -> &'static str {
        "roamjet-provisioning"
    }
}
