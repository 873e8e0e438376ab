//! Refresh-token grant against the partner authorization endpoint
//!
//! The endpoint takes a JSON body `{grant_type, client_id, refresh_token}` and
//! rotates both tokens on success. Failures are mapped onto the error variants
//! the lifecycle manager branches on:
//!
//! - 429 → [`Error::RateLimited`]
//! - any error body with `"error": "invalid_grant"` → [`Error::InvalidGrant`]
//! - connection failures → [`Error::Http`]
//! - everything else → [`Error::TokenExchange`]

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::REFRESH_GRANT_TYPE;
use crate::credentials::BoxFuture;
use crate::error::{Error, Result};

/// Successful refresh response.
///
/// `expires_in` is informational only; expiry decisions come from the
/// access token's own `exp` claim.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Something that can exchange a refresh token for a new token pair.
pub trait TokenEndpoint: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenResponse>>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    refresh_token: &'a str,
}

/// reqwest-backed authorization endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    url: String,
    client_id: String,
}

impl HttpTokenEndpoint {
    pub fn new(client: reqwest::Client, url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            client_id: client_id.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TokenEndpoint for HttpTokenEndpoint {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(&RefreshRequest {
                    grant_type: REFRESH_GRANT_TYPE,
                    client_id: &self.client_id,
                    refresh_token,
                })
                .send()
                .await
                .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                debug!(status = status.as_u16(), "token endpoint rejected refresh");
                return Err(classify_failure(status.as_u16(), &body));
            }

            response
                .json::<TokenResponse>()
                .await
                .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
        })
    }
}

/// Map a non-success token endpoint response to an error variant.
///
/// 429 wins over the body contents; `invalid_grant` is recognised on any
/// other status.
pub fn classify_failure(status: u16, body: &str) -> Error {
    if status == 429 {
        return Error::RateLimited(format!("token endpoint returned 429: {body}"));
    }

    let error_code = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned));

    if error_code.as_deref() == Some("invalid_grant") {
        return Error::InvalidGrant(format!("refresh token rejected ({status}): {body}"));
    }

    Error::TokenExchange(format!("token refresh returned {status}: {body}"))
}
