#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roamjet_backend::domain::{Lease, Order, OrderPatch, Principal, RedirectParams};
use roamjet_backend::identity::{IdentityError, IdentityProvider};
use roamjet_backend::provisioning::{
    CreateOrderRequest, CreateOrderResponse, ProvisioningApi, ProvisioningError,
    ProvisioningResult, QrCodeData, QrLookup,
};
use roamjet_backend::services::audit::{AuditEntry, AuditError, AuditSink};
use roamjet_backend::store::{
    InMemoryOrderStore, OrderStore, StoreError, StoreResult, WriteCondition, WriteOutcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const ORDER_ID: &str = "kargi-mobile-7days-1700000000-1234";

pub fn redirect(order_id: &str) -> RedirectParams {
    RedirectParams {
        order_id: Some(order_id.to_string()),
        email: Some("a@b.com".to_string()),
        total: Some("10".to_string()),
        currency: Some("usd".to_string()),
        name: Some("Kargi 7 Days".to_string()),
        ..Default::default()
    }
}

pub fn principal() -> Principal {
    Principal::new("user-1", "a@b.com", "token-1")
}

/// In-memory store that counts every call and can be switched offline.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryOrderStore,
    pub gets: AtomicUsize,
    pub claims: AtomicUsize,
    pub updates: AtomicUsize,
    pub inserts: AtomicUsize,
    pub offline: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        Self {
            inner: InMemoryOrderStore::with_orders(orders),
            ..Default::default()
        }
    }

    /// Calls that reached the store, reads included.
    pub fn total_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
            + self.claims.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.inserts.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.claims.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable {
                message: "connection refused".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OrderStore for CountingStore {
    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.get(order_id).await
    }

    async fn claim(
        &self,
        seed: &Order,
        lease: &Lease,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<WriteOutcome> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.claim(seed, lease, stale_before).await
    }

    async fn update(
        &self,
        order_id: &str,
        patch: &OrderPatch,
        condition: &WriteCondition,
    ) -> StoreResult<WriteOutcome> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.update(order_id, patch, condition).await
    }

    async fn insert(&self, order: &Order) -> StoreResult<WriteOutcome> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.insert(order).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.check_online()
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

#[derive(Debug, Clone)]
pub enum QrBehavior {
    Ready,
    NotReady,
    Error,
}

/// Provisioning API double with call counters.
pub struct MockProvisioning {
    pub create_calls: AtomicUsize,
    pub qr_calls: AtomicUsize,
    pub requests: Mutex<Vec<CreateOrderRequest>>,
    create_error: Option<ProvisioningError>,
    qr: QrBehavior,
    delay: Duration,
}

impl MockProvisioning {
    pub fn ready() -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            qr_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            create_error: None,
            qr: QrBehavior::Ready,
            delay: Duration::ZERO,
        }
    }

    pub fn with_create_error(mut self, error: ProvisioningError) -> Self {
        self.create_error = Some(error);
        self
    }

    pub fn with_qr(mut self, qr: QrBehavior) -> Self {
        self.qr = qr;
        self
    }

    /// Delay order creation, so concurrent attempts overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn qr_fetches(&self) -> usize {
        self.qr_calls.load(Ordering::SeqCst)
    }

    pub fn qr_data() -> QrCodeData {
        QrCodeData {
            qr_code: Some("data:image/png;base64,AAAA".to_string()),
            activation_code: Some("K2-ABC-123".to_string()),
            iccid: Some("8901000000000000001".to_string()),
            lpa: Some("LPA:1$smdp.roamjet.net$K2-ABC-123".to_string()),
            smdp_address: Some("smdp.roamjet.net".to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ProvisioningApi for MockProvisioning {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> ProvisioningResult<CreateOrderResponse> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.create_error {
            return Err(error.clone());
        }
        Ok(CreateOrderResponse {
            remote_order_id: format!("remote-{}", n),
            order_data: serde_json::json!({ "orderId": format!("remote-{}", n), "status": "created" }),
        })
    }

    async fn fetch_qr_code(&self, _order_id: &str) -> ProvisioningResult<QrLookup> {
        self.qr_calls.fetch_add(1, Ordering::SeqCst);
        match self.qr {
            QrBehavior::Ready => Ok(QrLookup::Ready(Self::qr_data())),
            QrBehavior::NotReady => Ok(QrLookup::NotReady),
            QrBehavior::Error => Err(ProvisioningError::Upstream {
                status: 502,
                message: "bad gateway".to_string(),
            }),
        }
    }

    async fn health_check(&self) -> ProvisioningResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock-provisioning"
    }
}

/// Audit sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingAuditSink {
    pub entries: Mutex<Vec<AuditEntry>>,
    pub fail: bool,
}

impl RecordingAuditSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn outcomes(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.outcome.clone())
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        if self.fail {
            return Err(AuditError::Rejected(500));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Resolves a fixed set of bearer tokens.
#[derive(Default)]
pub struct FixedIdentity {
    pub principals: HashMap<String, Principal>,
}

impl FixedIdentity {
    pub fn with(principal: Principal) -> Self {
        let mut principals = HashMap::new();
        principals.insert(principal.access_token.clone(), principal);
        Self { principals }
    }
}

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn resolve(&self, access_token: &str) -> Result<Option<Principal>, IdentityError> {
        Ok(self.principals.get(access_token).cloned())
    }
}
