use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{OrderStore, StoreError, StoreResult, WriteCondition, WriteOutcome};
use crate::domain::{Lease, Order, OrderPatch};

/// Process-local order store. The single mutex makes check-and-write atomic.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        Self {
            orders: Mutex::new(
                orders
                    .into_iter()
                    .map(|order| (order.order_id.clone(), order))
                    .collect(),
            ),
        }
    }

    pub async fn len(&self) -> usize {
        self.orders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.lock().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.orders.lock().await.get(order_id).cloned())
    }

    async fn claim(
        &self,
        seed: &Order,
        lease: &Lease,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<WriteOutcome> {
        let mut orders = self.orders.lock().await;
        let mut patch = OrderPatch::claim(lease);

        match orders.get_mut(&seed.order_id) {
            None => {
                let mut order = seed.clone();
                order.apply(&patch);
                orders.insert(order.order_id.clone(), order.clone());
                Ok(WriteOutcome::Applied(order))
            }
            Some(existing) if existing.is_claimable(stale_before) => {
                if existing.user_id.is_none() {
                    patch.user_id = seed.user_id.clone();
                }
                existing.apply(&patch);
                Ok(WriteOutcome::Applied(existing.clone()))
            }
            Some(_) => Ok(WriteOutcome::ConditionFailed),
        }
    }

    async fn update(
        &self,
        order_id: &str,
        patch: &OrderPatch,
        condition: &WriteCondition,
    ) -> StoreResult<WriteOutcome> {
        let mut orders = self.orders.lock().await;
        let existing = orders.get_mut(order_id).ok_or_else(|| StoreError::NotFound {
            order_id: order_id.to_string(),
        })?;

        if !condition.allows(existing) {
            return Ok(WriteOutcome::ConditionFailed);
        }
        existing.apply(patch);
        Ok(WriteOutcome::Applied(existing.clone()))
    }

    async fn insert(&self, order: &Order) -> StoreResult<WriteOutcome> {
        let mut orders = self.orders.lock().await;
        if orders.contains_key(&order.order_id) {
            return Ok(WriteOutcome::ConditionFailed);
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(WriteOutcome::Applied(order.clone()))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
