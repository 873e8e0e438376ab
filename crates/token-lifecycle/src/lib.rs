//! Creator token lifecycle
//!
//! Decides whether a stored access token can be handed out, refreshes it
//! against the authorization endpoint when it can't, and persists the new
//! pair before any caller sees it. Concurrent requests for the same creator
//! share a single refresh.
//!
//! Token lifecycle:
//! 1. Caller asks `TokenManager::get_valid_token(slug)`
//! 2. `needs_reauth` records fail fast; tokens with more than the expiry
//!    buffer left are returned as stored
//! 3. Otherwise one refresh per slug runs, retrying rate limits with
//!    exponential backoff and other transient failures after a fixed delay
//! 4. `invalid_grant` marks the record `needs_reauth`; only a manual
//!    credential capture brings it back
//! 5. A background sweep walks every record on an interval

pub mod classify;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod refresh;

#[cfg(test)]
mod testing;

pub use classify::{FailureClass, classify_refresh_error};
pub use error::{Error, Result};
pub use manager::{RefreshPolicy, TokenManager};
pub use refresh::{SweepOutcome, refresh_all, spawn_refresh_task};
