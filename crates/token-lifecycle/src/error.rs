//! Error types for token lifecycle operations

/// Errors surfaced by [`TokenManager::get_valid_token`](crate::TokenManager::get_valid_token).
///
/// `Clone` because every caller coalesced onto one refresh receives the same
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no credential record for slug {0}")]
    NotFound(String),

    /// Terminal until an operator supplies fresh tokens.
    #[error("creator {0} needs re-authentication")]
    NeedsReauth(String),

    #[error("token refresh for {slug} failed after {attempts} attempts: {last_error}")]
    RefreshExhausted {
        slug: String,
        attempts: u32,
        last_error: String,
    },

    #[error("credential store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
