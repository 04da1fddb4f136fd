//! Order store backed by the REST order API.
//!
//! * `GET  /orders/{id}`  -> 200 order | 404
//! * `PUT  /orders/{id}`  -> `{ set, expect?, upsert? }`; 200 order | 404 | 409/412 condition failed
//! * `POST /orders`       -> order; 201 | 409 when it exists

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{OrderStore, StoreError, StoreResult, WriteCondition, WriteOutcome};
use crate::config::OrderStoreConfig;
use crate::domain::{Lease, Order, OrderPatch};
use crate::http_client::{endpoint, path_segment, ApiHttpClient, ApiResponse};

#[derive(Debug, Serialize)]
struct ConditionalWrite<'a> {
    set: &'a OrderPatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    expect: Option<&'a WriteCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upsert: Option<&'a Order>,
}

/// The API has answered both with a bare order and wrapped in `{ order }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OrderEnvelope {
    Wrapped { order: Order },
    Bare(Order),
}

impl OrderEnvelope {
    fn into_order(self) -> Order {
        match self {
            OrderEnvelope::Wrapped { order } => order,
            OrderEnvelope::Bare(order) => order,
        }
    }
}

pub struct HttpOrderStore {
    base_url: String,
    http: ApiHttpClient,
}

impl HttpOrderStore {
    pub fn new(config: &OrderStoreConfig) -> StoreResult<Self> {
        let http = ApiHttpClient::new(config.timeout(), config.max_retries, config.api_key.clone())?;
        Ok(Self {
            base_url: config.base_url.clone(),
            http,
        })
    }

    fn order_url(&self, order_id: &str) -> String {
        endpoint(&self.base_url, &format!("orders/{}", path_segment(order_id)))
    }

    fn parse_order(response: &ApiResponse) -> StoreResult<Order> {
        serde_json::from_str::<OrderEnvelope>(&response.body)
            .map(OrderEnvelope::into_order)
            .map_err(|e| StoreError::InvalidResponse {
                message: e.to_string(),
            })
    }

    fn write_outcome(order_id: &str, response: &ApiResponse) -> StoreResult<WriteOutcome> {
        match response.status {
            status if status.is_success() => Ok(WriteOutcome::Applied(Self::parse_order(response)?)),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                debug!(order_id = %order_id, "order store rejected conditional write");
                Ok(WriteOutcome::ConditionFailed)
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                order_id: order_id.to_string(),
            }),
            status => Err(StoreError::Upstream {
                status: status.as_u16(),
                message: truncate(&response.body),
            }),
        }
    }

    async fn put(&self, order_id: &str, write: &ConditionalWrite<'_>) -> StoreResult<WriteOutcome> {
        let response = self
            .http
            .send(Method::PUT, &self.order_url(order_id), Some(write), None, false)
            .await?;
        Self::write_outcome(order_id, &response)
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl OrderStore for HttpOrderStore {
    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        let response = self
            .http
            .send::<()>(Method::GET, &self.order_url(order_id), None, None, true)
            .await?;

        match response.status {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(Self::parse_order(&response)?)),
            status => Err(StoreError::Upstream {
                status: status.as_u16(),
                message: truncate(&response.body),
            }),
        }
    }

    async fn claim(
        &self,
        seed: &Order,
        lease: &Lease,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<WriteOutcome> {
        let mut patch = OrderPatch::claim(lease);
        patch.user_id = seed.user_id.clone();
        let condition = WriteCondition::ClaimLease { stale_before };
        let write = ConditionalWrite {
            set: &patch,
            expect: Some(&condition),
            upsert: Some(seed),
        };

        let outcome = self.put(&seed.order_id, &write).await?;
        if outcome.is_applied() {
            info!(order_id = %seed.order_id, "processing lease claimed");
        }
        Ok(outcome)
    }

    async fn update(
        &self,
        order_id: &str,
        patch: &OrderPatch,
        condition: &WriteCondition,
    ) -> StoreResult<WriteOutcome> {
        let expect = match condition {
            WriteCondition::Unconditional => None,
            other => Some(other),
        };
        let write = ConditionalWrite {
            set: patch,
            expect,
            upsert: None,
        };
        self.put(order_id, &write).await
    }

    async fn insert(&self, order: &Order) -> StoreResult<WriteOutcome> {
        let response = self
            .http
            .send(
                Method::POST,
                &endpoint(&self.base_url, "orders"),
                Some(order),
                None,
                false,
            )
            .await?;
        Self::write_outcome(&order.order_id, &response)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let response = self
            .http
            .send::<()>(Method::GET, &endpoint(&self.base_url, "health"), None, None, false)
            .await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(StoreError::Upstream {
                status: response.status.as_u16(),
                message: truncate(&response.body),
            })
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
