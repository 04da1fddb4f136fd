use serde::{Deserialize, Serialize};

/// The authenticated user a reconciliation runs on behalf of.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub email: String,
    #[serde(rename = "accessToken", skip_serializing)]
    pub access_token: String,
}

impl Principal {
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            access_token: access_token.into(),
        }
    }
}

// Keeps bearer tokens out of logs.
impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("email", &crate::logging::mask_email(&self.email))
            .finish_non_exhaustive()
    }
}
