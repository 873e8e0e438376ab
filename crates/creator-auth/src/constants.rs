//! Defaults for the partner authorization endpoints and the credential table
//!
//! The LTK authorization URL and client id are deployment-specific and come
//! from configuration; only well-known public values live here.

/// Grant type sent on every refresh request.
pub const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Airtable REST API root.
pub const AIRTABLE_API_URL: &str = "https://api.airtable.com/v0";

/// Table holding one row per creator credential.
pub const CREDENTIALS_TABLE: &str = "LTK_Credentials";

/// Amazon token endpoint for the affiliate (creators) API.
pub const AMAZON_TOKEN_ENDPOINT: &str = "https://api.amazon.com/auth/O2/token";

/// Scope requested for affiliate client-credentials tokens.
pub const AMAZON_SCOPE: &str = "creatorsapi::default";

/// Affiliate tokens are treated as expired this long before `expires_in` elapses.
pub const CLIENT_CREDENTIALS_EARLY_EXPIRY_SECS: u64 = 30;
