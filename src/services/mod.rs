//! Services module for reconciliation and its cooperating services

pub mod attempt_guard;
pub mod audit;
pub mod plan_catalog;
pub mod qr;
pub mod reconciliation;
pub mod webhook_processor;

// Re-export orchestrator types
pub use crate::services::reconciliation::{
    FailureReason, ReconciliationError, ReconciliationOrchestrator, ReconciliationOutcome,
};
