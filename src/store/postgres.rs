//! Postgres order store (`database` feature). Schema: `migrations/0001_create_orders.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::info;

use super::{OrderStore, StoreError, StoreResult, WriteCondition, WriteOutcome};
use crate::domain::{Lease, Order, OrderPatch, ProcessingStatus};

const ORDER_COLUMNS: &str = "order_id, user_id, plan_id, plan_name, amount, currency, \
     customer_email, processing_status, link_used, processing_started_at, processing_key, \
     completed_at, failed_at, error_message, remote_order_id, order_data, iccid, qr_code, \
     qr_code_url, activation_code, smdp_address, lpa, status, created_at, updated_at";

/// `orders.*` predicate equivalent to `Order::is_claimable`, with the stale
/// cut-off bound at `$stale`.
fn claimable_predicate(stale: &str) -> String {
    format!(
        "NOT orders.link_used AND (orders.processing_status IN ('none', 'failed') \
         OR (orders.processing_status = 'processing' \
             AND (orders.processing_started_at IS NULL OR orders.processing_started_at < {stale})))"
    )
}

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    order_id: String,
    user_id: Option<String>,
    plan_id: String,
    plan_name: Option<String>,
    amount: i64,
    currency: String,
    customer_email: String,
    processing_status: String,
    link_used: bool,
    processing_started_at: Option<DateTime<Utc>>,
    processing_key: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    remote_order_id: Option<String>,
    order_data: Option<JsonValue>,
    iccid: Option<String>,
    qr_code: Option<String>,
    qr_code_url: Option<String>,
    activation_code: Option<String>,
    smdp_address: Option<String>,
    lpa: Option<String>,
    status: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            order_id: row.order_id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            plan_name: row.plan_name,
            amount: row.amount,
            currency: row.currency,
            customer_email: row.customer_email,
            processing_status: ProcessingStatus::from_db_status(&row.processing_status),
            link_used: row.link_used,
            processing_started_at: row.processing_started_at,
            processing_key: row.processing_key,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            error_message: row.error_message,
            remote_order_id: row.remote_order_id,
            order_data: row.order_data,
            iccid: row.iccid,
            qr_code: row.qr_code,
            qr_code_url: row.qr_code_url,
            activation_code: row.activation_code,
            smdp_address: row.smdp_address,
            lpa: row.lpa,
            status: row.status,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!(max_connections, "order store database pool initialized");
        Ok(Self::new(pool))
    }

    async fn exists(&self, order_id: &str) -> StoreResult<bool> {
        let found: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Order::from))
    }

    async fn claim(
        &self,
        seed: &Order,
        lease: &Lease,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<WriteOutcome> {
        let sql = format!(
            "INSERT INTO orders \
               (order_id, user_id, plan_id, plan_name, amount, currency, customer_email, \
                processing_status, link_used, processing_started_at, processing_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'processing', FALSE, $8, $9) \
             ON CONFLICT (order_id) DO UPDATE SET \
               processing_status = 'processing', \
               processing_started_at = EXCLUDED.processing_started_at, \
               processing_key = EXCLUDED.processing_key, \
               user_id = COALESCE(orders.user_id, EXCLUDED.user_id), \
               updated_at = NOW() \
             WHERE {} \
             RETURNING {ORDER_COLUMNS}",
            claimable_predicate("$10")
        );

        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(&seed.order_id)
            .bind(&seed.user_id)
            .bind(&seed.plan_id)
            .bind(&seed.plan_name)
            .bind(seed.amount)
            .bind(&seed.currency)
            .bind(&seed.customer_email)
            .bind(lease.started_at)
            .bind(&lease.key)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => WriteOutcome::Applied(row.into()),
            None => WriteOutcome::ConditionFailed,
        })
    }

    async fn update(
        &self,
        order_id: &str,
        patch: &OrderPatch,
        condition: &WriteCondition,
    ) -> StoreResult<WriteOutcome> {
        let guard = match condition {
            WriteCondition::Unconditional => String::new(),
            WriteCondition::ClaimLease { .. } => format!(" AND {}", claimable_predicate("$21")),
            WriteCondition::HoldsLease { .. } => " AND orders.processing_key = $21".to_string(),
        };
        let sql = format!(
            "UPDATE orders SET \
               user_id = COALESCE($2, user_id), \
               plan_name = COALESCE($3, plan_name), \
               processing_status = COALESCE($4, processing_status), \
               link_used = COALESCE($5, link_used), \
               processing_started_at = COALESCE($6, processing_started_at), \
               processing_key = COALESCE($7, processing_key), \
               completed_at = COALESCE($8, completed_at), \
               failed_at = COALESCE($9, failed_at), \
               error_message = COALESCE($10, error_message), \
               remote_order_id = COALESCE($11, remote_order_id), \
               order_data = COALESCE($12, order_data), \
               iccid = COALESCE($13, iccid), \
               qr_code = COALESCE($14, qr_code), \
               qr_code_url = COALESCE($15, qr_code_url), \
               activation_code = COALESCE($16, activation_code), \
               smdp_address = COALESCE($17, smdp_address), \
               lpa = COALESCE($18, lpa), \
               status = COALESCE($19, status), \
               updated_at = $20 \
             WHERE orders.order_id = $1{guard} \
             RETURNING {ORDER_COLUMNS}"
        );

        let mut query = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(&patch.user_id)
            .bind(&patch.plan_name)
            .bind(patch.processing_status.map(|s| s.as_str()))
            .bind(patch.link_used)
            .bind(patch.processing_started_at)
            .bind(&patch.processing_key)
            .bind(patch.completed_at)
            .bind(patch.failed_at)
            .bind(&patch.error_message)
            .bind(&patch.remote_order_id)
            .bind(&patch.order_data)
            .bind(&patch.iccid)
            .bind(&patch.qr_code)
            .bind(&patch.qr_code_url)
            .bind(&patch.activation_code)
            .bind(&patch.smdp_address)
            .bind(&patch.lpa)
            .bind(&patch.status)
            .bind(Utc::now());
        query = match condition {
            WriteCondition::Unconditional => query,
            WriteCondition::ClaimLease { stale_before } => query.bind(*stale_before),
            WriteCondition::HoldsLease { processing_key } => query.bind(processing_key.clone()),
        };

        match query.fetch_optional(&self.pool).await? {
            Some(row) => Ok(WriteOutcome::Applied(row.into())),
            None if self.exists(order_id).await? => Ok(WriteOutcome::ConditionFailed),
            None => Err(StoreError::NotFound {
                order_id: order_id.to_string(),
            }),
        }
    }

    async fn insert(&self, order: &Order) -> StoreResult<WriteOutcome> {
        let sql = format!(
            "INSERT INTO orders \
               (order_id, user_id, plan_id, plan_name, amount, currency, customer_email, \
                processing_status, link_used) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (order_id) DO NOTHING \
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(&order.order_id)
            .bind(&order.user_id)
            .bind(&order.plan_id)
            .bind(&order.plan_name)
            .bind(order.amount)
            .bind(&order.currency)
            .bind(&order.customer_email)
            .bind(order.processing_status.as_str())
            .bind(order.link_used)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => WriteOutcome::Applied(row.into()),
            None => WriteOutcome::ConditionFailed,
        })
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimable_predicate_binds_cutoff_parameter() {
        let predicate = claimable_predicate("$10");
        assert!(predicate.contains("orders.processing_started_at < $10"));
        assert!(predicate.starts_with("NOT orders.link_used"));
    }
}
