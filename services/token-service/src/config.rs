//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Store API keys, the cron secret and affiliate client credentials are
//! read from the environment only, never from the TOML, so they can't leak
//! through a committed config file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use creator_auth::{AIRTABLE_API_URL, AMAZON_SCOPE, AMAZON_TOKEN_ENDPOINT, CREDENTIALS_TABLE};
use serde::Deserialize;
use token_lifecycle::RefreshPolicy;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub affiliate: Option<AffiliateConfig>,
    #[serde(skip)]
    pub secrets: Secrets,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

/// Partner authorization endpoint and refresh policy
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_expiry_buffer_secs")]
    pub expiry_buffer_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_rate_limit_base_ms")]
    pub rate_limit_base_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_endpoint: String::new(),
            client_id: String::new(),
            expiry_buffer_secs: default_expiry_buffer_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            rate_limit_base_ms: default_rate_limit_base_ms(),
        }
    }
}

impl AuthConfig {
    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            expiry_buffer: Duration::from_secs(self.expiry_buffer_secs),
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            rate_limit_base: Duration::from_millis(self.rate_limit_base_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Airtable,
}

/// Credential store selection
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// File backend: path of the JSON credentials file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Airtable backend: base id (overridden by AIRTABLE_BASE_ID)
    #[serde(default)]
    pub base_id: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_airtable_api_url")]
    pub api_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: default_store_path(),
            base_id: None,
            table: default_table(),
            api_url: default_airtable_api_url(),
        }
    }
}

/// Background sweep settings
#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between sweeps; 0 disables the background task
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Client-credentials grant for the retail affiliate API
#[derive(Debug, Deserialize)]
pub struct AffiliateConfig {
    #[serde(default = "default_affiliate_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_affiliate_scope")]
    pub scope: String,
}

/// Values that only ever come from the environment.
#[derive(Debug, Default)]
pub struct Secrets {
    pub airtable_api_key: Option<Secret<String>>,
    pub cron_secret: Option<Secret<String>>,
    pub affiliate_client_id: Option<Secret<String>>,
    pub affiliate_client_secret: Option<Secret<String>>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_connections() -> usize {
    256
}

fn default_expiry_buffer_secs() -> u64 {
    30 * 60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_rate_limit_base_ms() -> u64 {
    1000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_table() -> String {
    CREDENTIALS_TABLE.to_string()
}

fn default_airtable_api_url() -> String {
    AIRTABLE_API_URL.to_string()
}

fn default_interval_secs() -> u64 {
    15 * 60
}

fn default_affiliate_endpoint() -> String {
    AMAZON_TOKEN_ENDPOINT.to_string()
}

fn default_affiliate_scope() -> String {
    AMAZON_SCOPE.to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn require_http_url(setting: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{setting} must start with http:// or https://, got: {url}"
        )))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// - `LTK_AUTH_URL`, `LTK_CLIENT_ID` override `[auth]`
    /// - `AIRTABLE_BASE_ID` overrides `[store] base_id`
    /// - `AIRTABLE_API_KEY`, `CRON_SECRET`, `AMAZON_CLIENT_ID` and
    ///   `AMAZON_CLIENT_SECRET` are only read from the environment
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(url) = non_empty_env("LTK_AUTH_URL") {
            self.auth.token_endpoint = url;
        }
        if let Some(id) = non_empty_env("LTK_CLIENT_ID") {
            self.auth.client_id = id;
        }
        if let Some(base) = non_empty_env("AIRTABLE_BASE_ID") {
            self.store.base_id = Some(base);
        }
        self.secrets = Secrets {
            airtable_api_key: non_empty_env("AIRTABLE_API_KEY").map(Secret::new),
            cron_secret: non_empty_env("CRON_SECRET").map(Secret::new),
            affiliate_client_id: non_empty_env("AMAZON_CLIENT_ID").map(Secret::new),
            affiliate_client_secret: non_empty_env("AMAZON_CLIENT_SECRET").map(Secret::new),
        };
    }

    fn validate(&self) -> common::Result<()> {
        if self.auth.token_endpoint.is_empty() {
            return Err(common::Error::missing("auth.token_endpoint (or LTK_AUTH_URL)"));
        }
        require_http_url("auth.token_endpoint", &self.auth.token_endpoint)?;

        if self.auth.client_id.is_empty() {
            return Err(common::Error::missing("auth.client_id (or LTK_CLIENT_ID)"));
        }

        if self.auth.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.service.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.store.backend == StoreBackend::Airtable {
            if self.secrets.airtable_api_key.is_none() {
                return Err(common::Error::missing("AIRTABLE_API_KEY"));
            }
            if self.store.base_id.as_deref().is_none_or(str::is_empty) {
                return Err(common::Error::missing("store.base_id (or AIRTABLE_BASE_ID)"));
            }
            require_http_url("store.api_url", &self.store.api_url)?;
        }

        if let Some(affiliate) = &self.affiliate {
            require_http_url("affiliate.token_endpoint", &affiliate.token_endpoint)?;
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("creator-token-service.toml")
    }
}
