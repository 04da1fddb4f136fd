//! Background QR polling for orders completed before their eSIM profile was
//! issued. Each queued order is polled once per cycle until its QR arrives or
//! it runs out of attempts; the dashboard picks the QR up from the order store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::ReconcileConfig;
use crate::services::qr::QrService;

#[derive(Debug, Clone)]
pub struct QrBackfillConfig {
    /// Time between polling cycles.
    pub poll_interval: Duration,
    /// Fetches per order before giving up.
    pub max_attempts: u32,
}

impl Default for QrBackfillConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_attempts: 20,
        }
    }
}

impl From<&ReconcileConfig> for QrBackfillConfig {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            poll_interval: config.qr_backfill_interval,
            max_attempts: config.qr_backfill_max_attempts,
        }
    }
}

pub struct QrBackfillWorker {
    qr: Arc<QrService>,
    queue: mpsc::Receiver<String>,
    config: QrBackfillConfig,
    /// order id -> attempts so far
    pending: HashMap<String, u32>,
}

impl QrBackfillWorker {
    pub fn new(qr: Arc<QrService>, queue: mpsc::Receiver<String>, config: QrBackfillConfig) -> Self {
        Self {
            qr,
            queue,
            config,
            pending: HashMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_attempts = self.config.max_attempts,
            "QR backfill worker started"
        );

        let mut ticker = interval_at(
            Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(pending = self.pending.len(), "QR backfill worker stopping");
                        break;
                    }
                }
                Some(order_id) = self.queue.recv() => {
                    self.pending.entry(order_id).or_insert(0);
                }
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.run_cycle().await;
                    }
                }
            }
        }

        info!("QR backfill worker stopped");
    }

    /// Move queued order ids into the pending set without waiting.
    pub fn drain_queue(&mut self) {
        while let Ok(order_id) = self.queue.try_recv() {
            self.pending.entry(order_id).or_insert(0);
        }
    }

    /// Poll every pending order once. Returns how many received their QR.
    pub async fn run_cycle(&mut self) -> usize {
        let order_ids: Vec<String> = self.pending.keys().cloned().collect();
        let mut attached = 0;

        for order_id in order_ids {
            let attempts = match self.pending.get_mut(&order_id) {
                Some(attempts) => {
                    *attempts += 1;
                    *attempts
                }
                None => continue,
            };

            let done = match self.qr.fetch_and_merge(&order_id).await {
                Ok(Some(_)) => {
                    attached += 1;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(order_id = %order_id, attempt = attempts, error = %e, "QR backfill attempt failed");
                    false
                }
            };

            if done {
                self.pending.remove(&order_id);
            } else if attempts >= self.config.max_attempts {
                warn!(
                    order_id = %order_id,
                    attempts,
                    "QR still unavailable, giving up on backfill"
                );
                self.pending.remove(&order_id);
            }
        }

        attached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, ProcessingStatus};
    use crate::provisioning::{
        CreateOrderRequest, CreateOrderResponse, ProvisioningApi, ProvisioningResult, QrCodeData,
        QrLookup,
    };
    use crate::store::{InMemoryOrderStore, OrderStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Not ready for the first `ready_after` fetches.
    struct EventuallyReady {
        ready_after: u32,
        fetches: AtomicU32,
    }

    #[async_trait]
    impl ProvisioningApi for EventuallyReady {
        async fn create_order(
            &self,
            _request: &CreateOrderRequest,
        ) -> ProvisioningResult<CreateOrderResponse> {
            unreachable!("backfill never provisions")
        }

        async fn fetch_qr_code(&self, _order_id: &str) -> ProvisioningResult<QrLookup> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.ready_after {
                Ok(QrLookup::Ready(QrCodeData {
                    lpa: Some("LPA:1$smdp.io$X".to_string()),
                    ..Default::default()
                }))
            } else {
                Ok(QrLookup::NotReady)
            }
        }

        async fn health_check(&self) -> ProvisioningResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "eventually-ready"
        }
    }

    fn setup(ready_after: u32, max_attempts: u32) -> (QrBackfillWorker, mpsc::Sender<String>, Arc<InMemoryOrderStore>) {
        let mut order = Order::new("o-1", "plan", 10, "usd", "a@b.com");
        order.processing_status = ProcessingStatus::Completed;
        let store = Arc::new(InMemoryOrderStore::with_orders([order]));
        let provisioning = Arc::new(EventuallyReady {
            ready_after,
            fetches: AtomicU32::new(0),
        });
        let (tx, rx) = mpsc::channel(8);
        let worker = QrBackfillWorker::new(
            Arc::new(QrService::new(store.clone(), provisioning)),
            rx,
            QrBackfillConfig {
                poll_interval: Duration::from_secs(5),
                max_attempts,
            },
        );
        (worker, tx, store)
    }

    #[tokio::test]
    async fn qr_is_attached_once_ready() {
        let (mut worker, tx, store) = setup(2, 5);
        tx.send("o-1".to_string()).await.unwrap();
        worker.drain_queue();

        assert_eq!(worker.run_cycle().await, 0);
        assert_eq!(worker.run_cycle().await, 0);
        assert_eq!(worker.run_cycle().await, 1);
        assert_eq!(worker.pending(), 0);
        assert!(store.get("o-1").await.unwrap().unwrap().has_qr());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (mut worker, tx, store) = setup(100, 2);
        tx.send("o-1".to_string()).await.unwrap();
        worker.drain_queue();

        worker.run_cycle().await;
        assert_eq!(worker.pending(), 1);
        worker.run_cycle().await;
        assert_eq!(worker.pending(), 0);
        assert!(!store.get("o-1").await.unwrap().unwrap().has_qr());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let (worker, tx, store) = setup(0, 5);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        tx.send("o-1".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.get("o-1").await.unwrap().unwrap().has_qr());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
