//! Redis key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod reconcile {
    use super::*;

    pub const NAMESPACE: &str = "reconcile";

    /// Marks an order whose reconciliation is in flight in this deployment.
    #[derive(Debug, Clone)]
    pub struct AttemptKey {
        pub order_id: String,
    }

    impl AttemptKey {
        pub fn new(order_id: impl Into<String>) -> Self {
            Self {
                order_id: order_id.into(),
            }
        }
    }

    impl fmt::Display for AttemptKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:attempt:{}", VERSION, NAMESPACE, self.order_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::reconcile::AttemptKey;

    #[test]
    fn attempt_key_is_versioned_and_namespaced() {
        assert_eq!(
            AttemptKey::new("kargi-1700000000-1").to_string(),
            "v1:reconcile:attempt:kargi-1700000000-1"
        );
    }
}
