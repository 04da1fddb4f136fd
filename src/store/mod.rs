//! Order store: the only shared mutable resource of the reconciliation flow.
//!
//! Every adapter must make `claim` and conditional `update` atomic with respect
//! to the condition check; that is what keeps provisioning at most once per
//! order across concurrent attempts.

pub mod error;
pub mod http;
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Lease, Order, OrderPatch};

pub use error::{StoreError, StoreResult};
pub use http::HttpOrderStore;
pub use memory::InMemoryOrderStore;
#[cfg(feature = "database")]
pub use postgres::PgOrderStore;

/// Precondition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WriteCondition {
    /// Always applies. Used for idempotent merges such as QR data.
    Unconditional,
    /// Applies when the record could be claimed: not link-used, and `none`,
    /// `failed`, or `processing` with a lease started before `stale_before`.
    #[serde(rename_all = "camelCase")]
    ClaimLease { stale_before: DateTime<Utc> },
    /// Applies only while the record still carries this processing key.
    #[serde(rename_all = "camelCase")]
    HoldsLease { processing_key: String },
}

impl WriteCondition {
    pub fn holds_lease(lease: &Lease) -> Self {
        WriteCondition::HoldsLease {
            processing_key: lease.key.clone(),
        }
    }

    pub fn allows(&self, order: &Order) -> bool {
        match self {
            WriteCondition::Unconditional => true,
            WriteCondition::ClaimLease { stale_before } => order.is_claimable(*stale_before),
            WriteCondition::HoldsLease { processing_key } => {
                order.processing_key.as_deref() == Some(processing_key.as_str())
            }
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Applied(Order),
    ConditionFailed,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch an order; `Ok(None)` when it does not exist.
    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>>;

    /// Take the processing lease in one conditional write, creating the record
    /// from `seed` when it does not exist yet.
    async fn claim(
        &self,
        seed: &Order,
        lease: &Lease,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<WriteOutcome>;

    /// Apply `patch` if `condition` holds. Fails with `NotFound` for a missing order.
    async fn update(
        &self,
        order_id: &str,
        patch: &OrderPatch,
        condition: &WriteCondition,
    ) -> StoreResult<WriteOutcome>;

    /// Create the order unless one with the same id exists.
    async fn insert(&self, order: &Order) -> StoreResult<WriteOutcome>;

    async fn health_check(&self) -> StoreResult<()>;

    fn name(&self) -> &'static str;
}
