//! QR / activation data retrieval after provisioning.
//!
//! Fetching is a pure read on the provisioning side and the merge is an
//! unconditional field merge, so both are safe to repeat.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Order, OrderPatch, Principal, ProcessingStatus};
use crate::logging::mask_identifier;
use crate::provisioning::{ProvisioningApi, ProvisioningError, QrLookup};
use crate::store::{OrderStore, StoreError, WriteCondition, WriteOutcome};

#[derive(Debug, Error)]
pub enum QrError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error("order {0} belongs to another user")]
    Forbidden(String),

    #[error("order {0} has not completed provisioning")]
    NotCompleted(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

#[derive(Debug, Clone)]
pub struct QrRefresh {
    pub order: Order,
    pub qr_ready: bool,
}

pub struct QrService {
    store: Arc<dyn OrderStore>,
    provisioning: Arc<dyn ProvisioningApi>,
}

impl QrService {
    pub fn new(store: Arc<dyn OrderStore>, provisioning: Arc<dyn ProvisioningApi>) -> Self {
        Self {
            store,
            provisioning,
        }
    }

    /// Owner-facing refresh: stored QR data when present, otherwise one fetch.
    pub async fn refresh(&self, order_id: &str, principal: &Principal) -> Result<QrRefresh, QrError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or_else(|| QrError::NotFound(order_id.to_string()))?;

        if order.user_id.as_deref() != Some(principal.id.as_str()) {
            return Err(QrError::Forbidden(order_id.to_string()));
        }
        if order.has_qr() {
            return Ok(QrRefresh {
                order,
                qr_ready: true,
            });
        }
        if order.processing_status != ProcessingStatus::Completed {
            return Err(QrError::NotCompleted(order_id.to_string()));
        }

        match self.fetch_and_merge(order_id).await? {
            Some(order) => Ok(QrRefresh {
                order,
                qr_ready: true,
            }),
            None => Ok(QrRefresh {
                order,
                qr_ready: false,
            }),
        }
    }

    /// Fetch the QR once and merge it onto the order. `Ok(None)` when the
    /// profile is still not ready.
    pub async fn fetch_and_merge(&self, order_id: &str) -> Result<Option<Order>, QrError> {
        let data = match self.provisioning.fetch_qr_code(order_id).await? {
            QrLookup::Ready(data) => data,
            QrLookup::NotReady => {
                debug!(order_id = %order_id, "QR code still not ready");
                return Ok(None);
            }
        };

        let mut patch = OrderPatch::default();
        data.merge_into(&mut patch);

        match self
            .store
            .update(order_id, &patch, &WriteCondition::Unconditional)
            .await?
        {
            WriteOutcome::Applied(order) => {
                info!(
                    order_id = %order_id,
                    iccid = ?order.iccid.as_deref().map(mask_identifier),
                    "QR code attached to order"
                );
                Ok(Some(order))
            }
            WriteOutcome::ConditionFailed => Ok(None),
        }
    }
}
