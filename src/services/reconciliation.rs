//! Payment-redirect reconciliation.
//!
//! Turns a payment gateway redirect into a provisioned eSIM order at most once
//! per order id. The order record is the only shared state; ownership of an
//! attempt is the processing lease taken by one conditional claim, and every
//! later write is conditioned on still holding it.
//!
//! Once a redirect is validated and authenticated the attempt runs on its own
//! task, so a caller that goes away mid-request cannot strand the order
//! between the claim and the completion write.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::ReconcileConfig;
use crate::domain::{Lease, Order, OrderPatch, PaymentInfo, Principal, ProcessingStatus, RedirectParams};
use crate::identity::return_path;
use crate::logging::{mask_email, mask_identifier};
use crate::provisioning::{CreateOrderRequest, ProvisioningApi, ProvisioningError, QrLookup};
use crate::services::attempt_guard::AttemptGuard;
use crate::services::audit::{AuditEntry, AuditLog};
use crate::services::plan_catalog::PlanCatalog;
use crate::store::{OrderStore, StoreError, WriteCondition, WriteOutcome};

/// The redirect cannot be reconciled as received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationError {
    #[error("missing payment information: {field}")]
    MissingPaymentInfo { field: &'static str },

    /// `return_to` is the payment-success path with all redirect parameters.
    #[error("authentication required")]
    AuthenticationRequired { return_to: String },
}

#[derive(Debug, Clone, Error)]
pub enum FailureReason {
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(ProvisioningError),

    /// The order stays `processing` until the lease goes stale.
    #[error("provisioning timed out")]
    ProvisioningTimedOut,

    /// The create call failed after it may have reached the backend. Like a
    /// timeout, the order stays `processing` until the lease goes stale.
    #[error("provisioning outcome unknown: {0}")]
    ProvisioningUnconfirmed(ProvisioningError),

    #[error("order store unavailable: {0}")]
    OrderStoreUnavailable(StoreError),

    /// Provisioning succeeded but the lease was reclaimed before the result
    /// could be recorded.
    #[error("processing lease lost after provisioning remote order {remote_order_id}")]
    LeaseLost { remote_order_id: String },
}

impl FailureReason {
    pub fn user_message(&self) -> String {
        match self {
            FailureReason::ProvisioningFailed(e) => e.user_message(),
            FailureReason::ProvisioningTimedOut | FailureReason::ProvisioningUnconfirmed(_) => {
                "Your eSIM is taking longer than usual to activate. Check your dashboard in a few minutes or contact support.".to_string()
            }
            FailureReason::OrderStoreUnavailable(_) => {
                "We could not confirm your order right now. Your payment was received; please refresh this page in a moment or contact support.".to_string()
            }
            FailureReason::LeaseLost { .. } => {
                "Your eSIM order needs a manual check. Your payment was received; please contact support with your order number.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconciliationOutcome {
    /// `qr_ready` is false when the profile was not issued yet; the QR is
    /// backfilled later and shows up on the dashboard.
    Success { order: Order, qr_ready: bool },
    AlreadyUsed,
    AlreadyProcessing,
    AlreadyCompleted { order: Order },
    Failed(FailureReason),
}

impl ReconciliationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Success { qr_ready: true, .. } => "success",
            ReconciliationOutcome::Success { qr_ready: false, .. } => "success_qr_pending",
            ReconciliationOutcome::AlreadyUsed => "already_used",
            ReconciliationOutcome::AlreadyProcessing => "already_processing",
            ReconciliationOutcome::AlreadyCompleted { .. } => "already_completed",
            ReconciliationOutcome::Failed(_) => "failed",
        }
    }

    pub fn order(&self) -> Option<&Order> {
        match self {
            ReconciliationOutcome::Success { order, .. }
            | ReconciliationOutcome::AlreadyCompleted { order } => Some(order),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationOrchestrator {
    store: Arc<dyn OrderStore>,
    provisioning: Arc<dyn ProvisioningApi>,
    config: Arc<ReconcileConfig>,
    catalog: Arc<PlanCatalog>,
    guard: Option<Arc<dyn AttemptGuard>>,
    audit: Option<AuditLog>,
    qr_backfill: Option<mpsc::Sender<String>>,
}

impl ReconciliationOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        provisioning: Arc<dyn ProvisioningApi>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            provisioning,
            config: Arc::new(config),
            catalog: Arc::new(PlanCatalog::default()),
            guard: None,
            audit: None,
            qr_backfill: None,
        }
    }

    pub fn with_plan_catalog(mut self, catalog: Arc<PlanCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_attempt_guard(mut self, guard: Arc<dyn AttemptGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Order ids whose QR was not ready are sent here.
    pub fn with_qr_backfill(mut self, tx: mpsc::Sender<String>) -> Self {
        self.qr_backfill = Some(tx);
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn plan_catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub async fn reconcile(
        &self,
        redirect: &RedirectParams,
        principal: Option<&Principal>,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let info = match redirect.validate() {
            Ok(info) => info,
            Err(e) => {
                let err = ReconciliationError::MissingPaymentInfo { field: e.field };
                self.record_rejected(redirect, principal, &err);
                return Err(err);
            }
        };

        let Some(principal) = principal else {
            let err = ReconciliationError::AuthenticationRequired {
                return_to: return_path(&self.config.success_path, redirect),
            };
            self.record_rejected(redirect, None, &err);
            return Err(err);
        };

        info!(
            order_id = %info.order_id,
            plan_id = %info.plan_id,
            user_id = %principal.id,
            email = %mask_email(&info.email),
            amount = info.amount,
            currency = %info.currency,
            "reconciling payment redirect"
        );

        let order_id = info.order_id.clone();
        let attempt = tokio::spawn(self.clone().attempt(info, principal.clone()));
        match attempt.await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                // Runtime shutdown; whatever the attempt wrote stands.
                error!(order_id = %order_id, error = %e, "reconciliation task cancelled");
                Ok(ReconciliationOutcome::AlreadyProcessing)
            }
        }
    }

    async fn attempt(self, info: PaymentInfo, principal: Principal) -> ReconciliationOutcome {
        let outcome = match &self.guard {
            Some(guard) => match AttemptSlot::acquire(guard, &info.order_id).await {
                Some(slot) => {
                    let outcome = self.run(&info, &principal).await;
                    slot.release().await;
                    outcome
                }
                None => {
                    info!(order_id = %info.order_id, "attempt already in flight");
                    ReconciliationOutcome::AlreadyProcessing
                }
            },
            None => self.run(&info, &principal).await,
        };

        self.record_audit(&info, &principal, &outcome);
        outcome
    }

    async fn run(&self, info: &PaymentInfo, principal: &Principal) -> ReconciliationOutcome {
        let order_id = info.order_id.as_str();

        let existing = match self.store.get(order_id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(order_id = %order_id, error = %e, "order lookup failed");
                return ReconciliationOutcome::Failed(FailureReason::OrderStoreUnavailable(e));
            }
        };

        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.config.stale_lease)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let stale_before = now - stale_after;

        if let Some(order) = &existing {
            if order.link_used {
                info!(order_id = %order_id, "payment link already used");
                return ReconciliationOutcome::AlreadyUsed;
            }
            match order.processing_status {
                ProcessingStatus::Completed => {
                    info!(order_id = %order_id, "order already completed");
                    return ReconciliationOutcome::AlreadyCompleted {
                        order: order.clone(),
                    };
                }
                ProcessingStatus::Processing if !order.lease_is_stale(stale_before) => {
                    info!(order_id = %order_id, "order already processing");
                    return ReconciliationOutcome::AlreadyProcessing;
                }
                ProcessingStatus::Processing => {
                    warn!(
                        order_id = %order_id,
                        started_at = ?order.processing_started_at,
                        "reclaiming stale processing lease"
                    );
                }
                ProcessingStatus::None | ProcessingStatus::Failed => {}
            }
        }

        let plan_name = self.catalog.display_name(&info.plan_id, info.name.as_deref());
        let mut seed = Order::new(
            order_id,
            info.plan_id.clone(),
            info.amount,
            info.currency.clone(),
            info.email.clone(),
        );
        seed.user_id = Some(principal.id.clone());
        seed.plan_name = Some(plan_name.clone());

        let lease = Lease::new(&principal.id, order_id, now);
        match self.store.claim(&seed, &lease, stale_before).await {
            Ok(WriteOutcome::Applied(_)) => {}
            Ok(WriteOutcome::ConditionFailed) => {
                info!(order_id = %order_id, "lost the race for the processing lease");
                return ReconciliationOutcome::AlreadyProcessing;
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "failed to claim processing lease");
                return ReconciliationOutcome::Failed(FailureReason::OrderStoreUnavailable(e));
            }
        }

        let request = CreateOrderRequest {
            plan_id: info.plan_id.clone(),
            quantity: 1,
            recipient_email: info.email.clone(),
            description: self
                .catalog
                .order_description(&info.plan_id, info.name.as_deref()),
            mode: self.config.payment_mode.as_str().to_string(),
        };

        let created = match self.provisioning.create_order(&request).await {
            Ok(created) => created,
            Err(e) if e.is_timeout() => {
                // The backend may still issue the profile; leave the lease to go stale.
                warn!(order_id = %order_id, error = %e, "provisioning timed out, order left processing");
                return ReconciliationOutcome::Failed(FailureReason::ProvisioningTimedOut);
            }
            Err(e) if e.may_have_been_delivered() => {
                warn!(order_id = %order_id, error = %e, "provisioning outcome unknown, order left processing");
                return ReconciliationOutcome::Failed(FailureReason::ProvisioningUnconfirmed(e));
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "provisioning failed");
                self.mark_failed(order_id, &lease, &e).await;
                return ReconciliationOutcome::Failed(FailureReason::ProvisioningFailed(e));
            }
        };

        let remote_order_id = created.remote_order_id.clone();
        let attach = OrderPatch {
            plan_name: existing
                .as_ref()
                .and_then(|o| o.plan_name.clone())
                .is_none()
                .then_some(plan_name),
            remote_order_id: Some(created.remote_order_id),
            order_data: Some(created.order_data),
            ..Default::default()
        };
        if let Err(reason) = self
            .write_under_lease(order_id, &attach, &lease, &remote_order_id)
            .await
        {
            return ReconciliationOutcome::Failed(reason);
        }

        let mut complete = OrderPatch {
            processing_status: Some(ProcessingStatus::Completed),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };

        let qr_ready = match self.provisioning.fetch_qr_code(order_id).await {
            Ok(QrLookup::Ready(data)) => {
                data.merge_into(&mut complete);
                true
            }
            Ok(QrLookup::NotReady) => {
                info!(order_id = %order_id, "QR code not ready yet");
                false
            }
            Err(e) => {
                // The profile exists; a QR read failure must not fail the order.
                warn!(order_id = %order_id, error = %e, "QR fetch failed, deferring to backfill");
                false
            }
        };

        match self
            .write_under_lease(order_id, &complete, &lease, &remote_order_id)
            .await
        {
            Ok(order) => {
                info!(
                    order_id = %order_id,
                    remote_order_id = %remote_order_id,
                    iccid = ?order.iccid.as_deref().map(mask_identifier),
                    qr_ready,
                    "order completed"
                );
                if !qr_ready {
                    self.queue_qr_backfill(order_id);
                }
                ReconciliationOutcome::Success { order, qr_ready }
            }
            Err(reason) => ReconciliationOutcome::Failed(reason),
        }
    }

    /// Apply `patch` only while `lease` is still the current one.
    async fn write_under_lease(
        &self,
        order_id: &str,
        patch: &OrderPatch,
        lease: &Lease,
        remote_order_id: &str,
    ) -> Result<Order, FailureReason> {
        match self
            .store
            .update(order_id, patch, &WriteCondition::holds_lease(lease))
            .await
        {
            Ok(WriteOutcome::Applied(order)) => Ok(order),
            Ok(WriteOutcome::ConditionFailed) => {
                error!(
                    order_id = %order_id,
                    remote_order_id = %remote_order_id,
                    "processing lease lost after provisioning"
                );
                Err(FailureReason::LeaseLost {
                    remote_order_id: remote_order_id.to_string(),
                })
            }
            Err(e) => {
                error!(
                    order_id = %order_id,
                    remote_order_id = %remote_order_id,
                    error = %e,
                    "failed to record provisioning result"
                );
                Err(FailureReason::OrderStoreUnavailable(e))
            }
        }
    }

    async fn mark_failed(&self, order_id: &str, lease: &Lease, cause: &ProvisioningError) {
        let patch = OrderPatch {
            processing_status: Some(ProcessingStatus::Failed),
            error_message: Some(cause.to_string()),
            failed_at: Some(Utc::now()),
            ..Default::default()
        };
        match self
            .store
            .update(order_id, &patch, &WriteCondition::holds_lease(lease))
            .await
        {
            Ok(WriteOutcome::Applied(_)) => {}
            Ok(WriteOutcome::ConditionFailed) => {
                warn!(order_id = %order_id, "lease lost before failure could be recorded");
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "failed to record provisioning failure");
            }
        }
    }

    fn queue_qr_backfill(&self, order_id: &str) {
        let Some(tx) = &self.qr_backfill else {
            return;
        };
        if let Err(e) = tx.try_send(order_id.to_string()) {
            warn!(order_id = %order_id, error = %e, "QR backfill queue unavailable");
        }
    }

    fn record_audit(&self, info: &PaymentInfo, principal: &Principal, outcome: &ReconciliationOutcome) {
        let Some(audit) = &self.audit else {
            return;
        };
        audit.record(AuditEntry {
            order_id: info.order_id.clone(),
            user_id: Some(principal.id.clone()),
            plan_id: info.plan_id.clone(),
            customer_email: info.email.clone(),
            amount: info.amount,
            currency: info.currency.clone(),
            outcome: outcome.label().to_string(),
            remote_order_id: outcome.order().and_then(|o| o.remote_order_id.clone()),
            error: match outcome {
                ReconciliationOutcome::Failed(reason) => Some(reason.to_string()),
                _ => None,
            },
            recorded_at: Utc::now(),
        });
    }

    /// Redirects turned away before an attempt started are logged with
    /// whatever the gateway sent.
    fn record_rejected(
        &self,
        redirect: &RedirectParams,
        principal: Option<&Principal>,
        err: &ReconciliationError,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let outcome = match err {
            ReconciliationError::MissingPaymentInfo { .. } => "missing_payment_info",
            ReconciliationError::AuthenticationRequired { .. } => "authentication_required",
        };
        audit.record(AuditEntry {
            order_id: redirect
                .order_id
                .clone()
                .or_else(|| redirect.order.clone())
                .unwrap_or_default(),
            user_id: principal.map(|p| p.id.clone()),
            plan_id: redirect.plan_id.clone().unwrap_or_default(),
            customer_email: redirect.email.clone().unwrap_or_default(),
            amount: 0,
            currency: redirect.currency.clone().unwrap_or_default(),
            outcome: outcome.to_string(),
            remote_order_id: None,
            error: Some(err.to_string()),
            recorded_at: Utc::now(),
        });
    }
}

/// Holds the attempt-guard slot for one order. Dropping it without
/// [`AttemptSlot::release`] still frees the slot from a background task.
struct AttemptSlot {
    guard: Arc<dyn AttemptGuard>,
    order_id: Option<String>,
}

impl AttemptSlot {
    async fn acquire(guard: &Arc<dyn AttemptGuard>, order_id: &str) -> Option<Self> {
        guard.try_acquire(order_id).await.then(|| AttemptSlot {
            guard: guard.clone(),
            order_id: Some(order_id.to_string()),
        })
    }

    async fn release(mut self) {
        if let Some(order_id) = &self.order_id {
            self.guard.release(order_id).await;
        }
        self.order_id = None;
    }
}

impl Drop for AttemptSlot {
    fn drop(&mut self) {
        let Some(order_id) = self.order_id.take() else {
            return;
        };
        let guard = self.guard.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { guard.release(&order_id).await });
            }
            Err(_) => warn!(order_id = %order_id, "attempt slot dropped outside a runtime"),
        }
    }
}
