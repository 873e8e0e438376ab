//! Error types for credential storage and token endpoint calls

/// Errors from credential storage and authorization endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The endpoint answered 429.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The refresh token is dead; only a manual re-auth can recover.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store request failed: {0}")]
    Store(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
