//! Client side of the eSIM provisioning backend

pub mod client;
pub mod error;
pub mod provider;
pub mod types;

pub use client::HttpProvisioningClient;
pub use error::{ProvisioningError, ProvisioningResult};
pub use provider::ProvisioningApi;
pub use types::{CreateOrderRequest, CreateOrderResponse, QrCodeData, QrLookup};
