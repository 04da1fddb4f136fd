//! Best-effort usage/audit log.
//!
//! The orchestrator hands entries to [`AuditLog::record`], which never blocks
//! and never fails; a background task drains the channel into an
//! [`AuditSink`]. A full channel or a failing sink only costs the entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::http_client::{endpoint, ApiHttpClient};
use crate::logging::mask_email;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
    #[error("audit sink rejected entry: HTTP {0}")]
    Rejected(u16),
}

impl From<crate::http_client::HttpError> for AuditError {
    fn from(err: crate::http_client::HttpError) -> Self {
        AuditError::Unavailable(err.to_string())
    }
}

/// One reconciliation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub order_id: String,
    pub user_id: Option<String>,
    pub plan_id: String,
    pub customer_email: String,
    pub amount: i64,
    pub currency: String,
    /// Outcome label, e.g. `success`, `already_processing`, `failed`.
    pub outcome: String,
    pub remote_order_id: Option<String>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Writes entries to the log stream only.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        info!(
            order_id = %entry.order_id,
            plan_id = %entry.plan_id,
            email = %mask_email(&entry.customer_email),
            amount = entry.amount,
            currency = %entry.currency,
            outcome = %entry.outcome,
            "reconciliation audit"
        );
        Ok(())
    }
}

/// `POST {base}/usage-logs`
pub struct HttpAuditSink {
    url: String,
    http: ApiHttpClient,
}

impl HttpAuditSink {
    pub fn new(base_url: &str, http: ApiHttpClient) -> Self {
        Self {
            url: endpoint(base_url, "usage-logs"),
            http,
        }
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let response = self
            .http
            .send(Method::POST, &self.url, Some(entry), None, false)
            .await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(AuditError::Rejected(response.status.as_u16()))
        }
    }
}

/// Non-blocking handle onto the audit channel.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditLog {
    /// Create the channel and spawn the task that drains it into `sink`.
    /// The task ends once every `AuditLog` clone is dropped.
    pub fn spawn(sink: Arc<dyn AuditSink>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditEntry>(buffer.max(1));
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = sink.write(&entry).await {
                    warn!(order_id = %entry.order_id, error = %e, "audit entry dropped");
                }
            }
            debug!("audit log drained");
        });
        (Self { tx }, handle)
    }

    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            let (reason, order_id) = match &e {
                mpsc::error::TrySendError::Full(entry) => ("full", entry.order_id.clone()),
                mpsc::error::TrySendError::Closed(entry) => ("closed", entry.order_id.clone()),
            };
            warn!(order_id = %order_id, reason, "audit channel unavailable, entry dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
            self.entries.lock().await.push(entry.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn write(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Rejected(500))
        }
    }

    fn entry(order_id: &str) -> AuditEntry {
        AuditEntry {
            order_id: order_id.to_string(),
            user_id: Some("u1".to_string()),
            plan_id: "plan".to_string(),
            customer_email: "a@b.com".to_string(),
            amount: 10,
            currency: "usd".to_string(),
            outcome: "success".to_string(),
            remote_order_id: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entries_reach_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let (log, handle) = AuditLog::spawn(sink.clone(), 8);
        log.record(entry("o-1"));
        log.record(entry("o-2"));
        drop(log);
        handle.await.unwrap();

        let entries = sink.entries.lock().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].order_id, "o-2");
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_the_drain() {
        let (log, handle) = AuditLog::spawn(Arc::new(FailingSink), 8);
        log.record(entry("o-1"));
        log.record(entry("o-2"));
        drop(log);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("drain task should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn record_after_drain_stopped_is_silent() {
        let (log, handle) = AuditLog::spawn(Arc::new(TracingAuditSink), 1);
        handle.abort();
        let _ = handle.await;
        log.record(entry("o-1"));
    }

    #[test]
    fn entry_serializes_camel_case() {
        let json = serde_json::to_value(entry("o-1")).unwrap();
        assert_eq!(json["orderId"], "o-1");
        assert_eq!(json["customerEmail"], "a@b.com");
    }
}
