use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use super::{IdentityError, IdentityProvider};
use crate::config::IdentityConfig;
use crate::domain::Principal;
use crate::http_client::{endpoint, ApiHttpClient, ApiResponse};

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(alias = "uid", alias = "userId")]
    id: String,
    #[serde(default)]
    email: String,
}

/// Resolves tokens with `GET /auth/me`.
pub struct HttpIdentityProvider {
    base_url: String,
    http: ApiHttpClient,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Result<Self, IdentityError> {
        // The lookup runs inside the caller's own deadline; one attempt only.
        let http = ApiHttpClient::new(config.timeout(), 0, None)?;
        Ok(Self {
            base_url: config.base_url.clone(),
            http,
        })
    }

    fn parse(response: &ApiResponse, access_token: &str) -> Result<Option<Principal>, IdentityError> {
        match response.status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let me: MeResponse = serde_json::from_str(&response.body).map_err(|e| {
                    IdentityError::InvalidResponse {
                        message: e.to_string(),
                    }
                })?;
                Ok(Some(Principal::new(me.id, me.email, access_token)))
            }
            status => Err(IdentityError::Unavailable {
                message: format!("identity service returned HTTP {}", status.as_u16()),
            }),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, access_token: &str) -> Result<Option<Principal>, IdentityError> {
        let response = self
            .http
            .send::<()>(
                Method::GET,
                &endpoint(&self.base_url, "auth/me"),
                None,
                Some(access_token),
                true,
            )
            .await?;
        Self::parse(&response, access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: StatusCode, body: &str) -> ApiResponse {
        ApiResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn unauthorized_means_no_principal() {
        assert!(HttpIdentityProvider::parse(&response(StatusCode::UNAUTHORIZED, ""), "t")
            .unwrap()
            .is_none());
    }

    #[test]
    fn me_response_accepts_uid_alias() {
        let principal = HttpIdentityProvider::parse(
            &response(StatusCode::OK, r#"{"uid":"user-7","email":"a@b.com"}"#),
            "token",
        )
        .unwrap()
        .unwrap();
        assert_eq!(principal.id, "user-7");
        assert_eq!(principal.access_token, "token");
    }

    #[test]
    fn server_errors_are_surfaced() {
        assert!(matches!(
            HttpIdentityProvider::parse(&response(StatusCode::BAD_GATEWAY, ""), "t"),
            Err(IdentityError::Unavailable { .. })
        ));
    }
}
