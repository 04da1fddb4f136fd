//! Payment-redirect reconciliation for Roamjet eSIM orders.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod identity;
pub mod logging;
pub mod middleware;
pub mod provisioning;
pub mod services;
pub mod store;
pub mod workers;
