//! App-level tokens for the retail affiliate API
//!
//! The affiliate API uses a plain `client_credentials` grant: no refresh
//! token, nothing persisted. Tokens are cached per key in process memory and
//! dropped [`CLIENT_CREDENTIALS_EARLY_EXPIRY_SECS`] before they expire.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::constants::{AMAZON_SCOPE, AMAZON_TOKEN_ENDPOINT, CLIENT_CREDENTIALS_EARLY_EXPIRY_SECS};
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct ClientCredentialsResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Per-key cache of client-credentials access tokens.
pub struct ClientCredentialsCache {
    client: reqwest::Client,
    endpoint: String,
    scope: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl ClientCredentialsCache {
    /// Cache against the Amazon token endpoint with the creators API scope.
    ///
    /// Missing credentials are accepted here and reported on first use, so a
    /// deployment without affiliate access still starts.
    pub fn new(
        client: reqwest::Client,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self::with_endpoint(client, AMAZON_TOKEN_ENDPOINT, AMAZON_SCOPE, client_id, client_secret)
    }

    pub fn with_endpoint(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        scope: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            scope: scope.into(),
            client_id,
            client_secret,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Return a cached token for `key`, fetching a new one when absent or stale.
    pub async fn get_token(&self, key: &str) -> Result<String> {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(key) {
            if Instant::now() < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let (client_id, client_secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id.as_str(), secret.as_str()),
            _ => {
                return Err(Error::InvalidCredentials(
                    "affiliate client credentials not configured".into(),
                ));
            }
        };

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("client credentials request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::TokenExchange(format!(
                "client credentials grant returned {status}: {body}"
            )));
        }

        let token = response
            .json::<ClientCredentialsResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid client credentials response: {e}")))?;

        let lifetime = token
            .expires_in
            .saturating_sub(CLIENT_CREDENTIALS_EARLY_EXPIRY_SECS);
        tokens.insert(
            key.to_string(),
            CachedToken {
                access_token: token.access_token.clone(),
                expires_at: Instant::now() + Duration::from_secs(lifetime),
            },
        );
        debug!(key, lifetime_secs = lifetime, "cached client credentials token");
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache(server: &MockServer) -> ClientCredentialsCache {
        ClientCredentialsCache::with_endpoint(
            reqwest::Client::new(),
            format!("{}/auth/O2/token", server.uri()),
            AMAZON_SCOPE,
            Some("amzn-client".into()),
            Some("amzn-secret".into()),
        )
    }

    #[tokio::test]
    async fn caches_token_per_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=amzn-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "Atza|first",
                "expires_in": 3600,
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(&server);
        assert_eq!(cache.get_token("nicki").await.unwrap(), "Atza|first");
        assert_eq!(cache.get_token("nicki").await.unwrap(), "Atza|first");
        // A different key has its own entry
        assert_eq!(cache.get_token("jess").await.unwrap(), "Atza|first");
    }

    #[tokio::test]
    async fn refetches_once_early_expiry_passes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "Atza|short",
                // Shorter than the early-expiry margin: never served from cache
                "expires_in": 10,
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(&server);
        cache.get_token("nicki").await.unwrap();
        cache.get_token("nicki").await.unwrap();
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cache = ClientCredentialsCache::with_endpoint(
            reqwest::Client::new(),
            server.uri(),
            AMAZON_SCOPE,
            Some("amzn-client".into()),
            None,
        );
        let err = cache.get_token("nicki").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn endpoint_errors_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad client"))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(&server);
        assert!(matches!(
            cache.get_token("nicki").await,
            Err(Error::TokenExchange(_))
        ));
        assert!(cache.get_token("nicki").await.is_err());
    }
}
