//! Domain types shared by the store, provisioning and reconciliation layers

pub mod order;
pub mod principal;
pub mod redirect;

pub use order::{Lease, Order, OrderPatch, ProcessingStatus};
pub use principal::Principal;
pub use redirect::{extract_plan_id, MissingField, PaymentInfo, RedirectParams};
