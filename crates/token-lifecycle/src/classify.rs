//! Classification of refresh failures
//!
//! Decides what the refresh loop does with a failed attempt. Rate limiting
//! backs off exponentially, a dead refresh token stops immediately, and
//! everything else is retried after a fixed delay.

use creator_auth::Error as AuthError;

/// Retry strategy for a failed refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 429: wait `base * 2^attempt` and retry
    Backoff,
    /// `invalid_grant`: persist `needs_reauth`, never retry
    Permanent,
    /// Network failure or unexpected status: fixed delay, retry
    Transient,
}

impl FailureClass {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureClass::Backoff => "rate_limited",
            FailureClass::Permanent => "invalid_grant",
            FailureClass::Transient => "transient",
        }
    }
}

/// Classify an error returned by the authorization endpoint.
pub fn classify_refresh_error(err: &AuthError) -> FailureClass {
    match err {
        AuthError::RateLimited(_) => FailureClass::Backoff,
        AuthError::InvalidGrant(_) => FailureClass::Permanent,
        _ => FailureClass::Transient,
    }
}
