use crate::provisioning::error::ProvisioningResult;
use crate::provisioning::types::{CreateOrderRequest, CreateOrderResponse, QrLookup};
use async_trait::async_trait;

/// The eSIM provisioning backend.
///
/// `create_order` has an external side effect (an eSIM profile is issued), so
/// implementations must not retry it. `fetch_qr_code` is a read and may be
/// retried freely.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> ProvisioningResult<CreateOrderResponse>;

    async fn fetch_qr_code(&self, order_id: &str) -> ProvisioningResult<QrLookup>;

    async fn health_check(&self) -> ProvisioningResult<()>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::types::QrCodeData;
    use serde_json::json;

    struct MockProvisioning;

    #[async_trait]
    impl ProvisioningApi for MockProvisioning {
        async fn create_order(
            &self,
            request: &CreateOrderRequest,
        ) -> ProvisioningResult<CreateOrderResponse> {
            Ok(CreateOrderResponse {
                remote_order_id: format!("remote-{}", request.plan_id),
                order_data: json!({ "planId": request.plan_id }),
            })
        }

        async fn fetch_qr_code(&self, _order_id: &str) -> ProvisioningResult<QrLookup> {
            Ok(QrLookup::Ready(QrCodeData {
                qr_code: Some("LPA:1$smdp$code".to_string()),
                ..Default::default()
            }))
        }

        async fn health_check(&self) -> ProvisioningResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn trait_is_object_safe() {
        let api: Box<dyn ProvisioningApi> = Box::new(MockProvisioning);
        let created = api
            .create_order(&CreateOrderRequest {
                plan_id: "kargi-mobile-7days".to_string(),
                quantity: 1,
                recipient_email: "a@b.com".to_string(),
                description: "eSIM order".to_string(),
                mode: "test".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(created.remote_order_id, "remote-kargi-mobile-7days");
        assert!(matches!(
            api.fetch_qr_code("o").await.unwrap(),
            QrLookup::Ready(_)
        ));
        assert_eq!(api.name(), "mock");
    }
}
