//! Token lifecycle manager
//!
//! Produces a usable access token for a creator slug. The stored token is
//! reused while its `exp` claim is more than the expiry buffer away;
//! otherwise it is refreshed against the authorization endpoint and the new
//! pair is persisted before anyone sees it.
//!
//! At most one refresh per slug is outstanding in this process. The first
//! caller that needs a refresh spawns it and records a ticket (a shared,
//! awaitable handle) in the in-flight map; later callers for the same slug
//! await that ticket instead of starting their own. The refresh runs on its
//! own task, so a caller that gives up early does not cancel it, and a drop
//! guard inside the task removes the ticket on every exit path.
//!
//! A caller's store read can race a refresh that settles while the read is
//! still outstanding, leaving the caller with a refresh token that has
//! already been rotated. The ticket map is therefore consulted before the
//! read, and every refresh task re-reads the record before it touches the
//! endpoint.
//!
//! The map is process-local. Two service instances can still refresh the
//! same slug at once, and the rotated refresh tokens then invalidate each
//! other. Run a single instance per credential table, or put a distributed
//! lock keyed by slug in front of this type.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use creator_auth::{CredentialRecord, CredentialStore, CredentialUpdate, TokenEndpoint, TokenStatus};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::classify::{FailureClass, classify_refresh_error};
use crate::error::{Error, Result};
use crate::metrics;

/// Retry and reuse parameters for token refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Tokens expiring within this window are refreshed before use.
    pub expiry_buffer: Duration,
    /// Total refresh attempts, rate-limited ones included.
    pub max_attempts: u32,
    /// Delay after a transient failure.
    pub retry_delay: Duration,
    /// 429 backoff is `rate_limit_base * 2^attempt`.
    pub rate_limit_base: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            expiry_buffer: Duration::from_secs(30 * 60),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            rate_limit_base: Duration::from_secs(1),
        }
    }
}

impl RefreshPolicy {
    /// Backoff after a 429 on `attempt` (0-based).
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        self.rate_limit_base.saturating_mul(1u32 << attempt.min(16))
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<String>>>;

struct Ticket {
    id: u64,
    refresh: SharedRefresh,
}

type InFlight = Arc<Mutex<HashMap<String, Ticket>>>;

/// Removes its ticket from the in-flight map when the refresh task ends,
/// however it ends.
struct TicketGuard {
    slug: String,
    id: u64,
    in_flight: InFlight,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&self.slug).is_some_and(|t| t.id == self.id) {
            in_flight.remove(&self.slug);
        }
    }
}

/// Hands out valid access tokens, refreshing and persisting as needed.
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    policy: RefreshPolicy,
    in_flight: InFlight,
    next_ticket: AtomicU64,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        policy: RefreshPolicy,
    ) -> Self {
        info!(
            expiry_buffer_secs = policy.expiry_buffer.as_secs(),
            max_attempts = policy.max_attempts,
            "token manager initialized"
        );
        Self {
            store,
            endpoint,
            policy,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Return a usable access token for `slug`.
    ///
    /// - `NotFound` when the store has no record for the slug
    /// - `NeedsReauth` without any network call when the record is already
    ///   `needs_reauth`, or when the refresh token turns out to be dead
    /// - `RefreshExhausted` when every attempt failed transiently
    ///
    /// Concurrent callers for the same slug share one refresh and one outcome.
    pub async fn get_valid_token(&self, slug: &str) -> Result<String> {
        if let Some(refresh) = self.in_flight_for(slug) {
            return refresh.await;
        }

        let record = self
            .store
            .get_by_slug(slug)
            .await
            .map_err(|e| Error::Store(format!("looking up {slug}: {e}")))?
            .ok_or_else(|| Error::NotFound(slug.to_string()))?;

        if record.status == TokenStatus::NeedsReauth {
            debug!(slug, "credential needs re-authentication, not refreshing");
            metrics::record_token_request("needs_reauth");
            return Err(Error::NeedsReauth(slug.to_string()));
        }

        if let Some(access) = record.access_token.as_deref() {
            if !creator_auth::is_expiring(access, self.policy.expiry_buffer, Utc::now()) {
                debug!(slug, "stored access token still valid");
                metrics::record_token_request("cached");
                return Ok(access.to_string());
            }
        }

        self.join_or_start(&record.slug).await
    }

    /// Number of refreshes currently outstanding.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    fn in_flight_for(&self, slug: &str) -> Option<SharedRefresh> {
        join_ticket(&self.in_flight.lock(), slug)
    }

    /// Await the in-flight refresh for `slug`, starting one if none exists.
    fn join_or_start(&self, slug: &str) -> SharedRefresh {
        let mut in_flight = self.in_flight.lock();
        if let Some(refresh) = join_ticket(&in_flight, slug) {
            return refresh;
        }

        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let slug = slug.to_string();
        debug!(slug = %slug, ticket = id, "starting token refresh");
        metrics::record_token_request("refreshed");

        let guard = TicketGuard {
            slug: slug.clone(),
            id,
            in_flight: self.in_flight.clone(),
        };
        let task_slug = slug.clone();
        let store = self.store.clone();
        let endpoint = self.endpoint.clone();
        let policy = self.policy.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            reload_and_refresh(store.as_ref(), endpoint.as_ref(), &policy, &task_slug).await
        });

        let refresh = async move {
            task.await
                .unwrap_or_else(|e| Err(Error::Internal(format!("refresh task failed: {e}"))))
        }
        .boxed()
        .shared();

        in_flight.insert(
            slug,
            Ticket {
                id,
                refresh: refresh.clone(),
            },
        );
        refresh
    }
}

fn join_ticket(in_flight: &HashMap<String, Ticket>, slug: &str) -> Option<SharedRefresh> {
    let ticket = in_flight.get(slug)?;
    debug!(slug, ticket = ticket.id, "joining in-flight refresh");
    metrics::record_token_request("coalesced");
    Some(ticket.refresh.clone())
}

/// Runs on the refresh task. The record is read again now that this task
/// owns the slug; a token persisted by a refresh that settled in the
/// meantime is returned as is.
async fn reload_and_refresh(
    store: &dyn CredentialStore,
    endpoint: &dyn TokenEndpoint,
    policy: &RefreshPolicy,
    slug: &str,
) -> Result<String> {
    let record = store
        .get_by_slug(slug)
        .await
        .map_err(|e| Error::Store(format!("looking up {slug}: {e}")))?
        .ok_or_else(|| Error::NotFound(slug.to_string()))?;

    if record.status == TokenStatus::NeedsReauth {
        return Err(Error::NeedsReauth(slug.to_string()));
    }
    if let Some(access) = record.access_token.as_deref() {
        if !creator_auth::is_expiring(access, policy.expiry_buffer, Utc::now()) {
            debug!(slug, "token already refreshed, skipping endpoint call");
            return Ok(access.to_string());
        }
    }

    refresh(store, endpoint, policy, &record).await
}

/// The refresh procedure: up to `max_attempts` calls to the endpoint.
///
/// Side effects are ordered: the token write completes before the new token
/// is returned, and the `needs_reauth` write completes before that error is
/// returned.
async fn refresh(
    store: &dyn CredentialStore,
    endpoint: &dyn TokenEndpoint,
    policy: &RefreshPolicy,
    record: &CredentialRecord,
) -> Result<String> {
    let slug = record.slug.as_str();
    let started = Instant::now();

    if record.refresh_token.is_empty() {
        warn!(slug, "no refresh token stored, marking needs_reauth");
        return mark_needs_reauth(store, record, started).await;
    }

    let mut last_error = String::new();
    for attempt in 0..policy.max_attempts {
        let err = match endpoint.refresh(&record.refresh_token).await {
            Ok(tokens) => {
                metrics::record_refresh_attempt("success");
                let update = CredentialUpdate::tokens(
                    tokens.access_token.clone(),
                    tokens.refresh_token,
                    Utc::now(),
                );
                if let Err(e) = store.update(&record.id, update).await {
                    // The old refresh token is already rotated out; retrying
                    // would only earn an invalid_grant.
                    error!(slug, error = %e, "failed to persist refreshed tokens");
                    metrics::record_refresh_result("store_error", started.elapsed());
                    return Err(Error::Store(format!(
                        "persisting refreshed tokens for {slug}: {e}"
                    )));
                }
                info!(slug, attempt, "token refresh succeeded");
                metrics::record_refresh_result("success", started.elapsed());
                return Ok(tokens.access_token);
            }
            Err(e) => e,
        };

        let class = classify_refresh_error(&err);
        metrics::record_refresh_attempt(class.label());
        last_error = err.to_string();
        let attempts_left = attempt + 1 < policy.max_attempts;

        match class {
            FailureClass::Permanent => {
                warn!(slug, attempt, error = %err, "refresh token rejected, marking needs_reauth");
                return mark_needs_reauth(store, record, started).await;
            }
            FailureClass::Backoff => {
                let delay = policy.rate_limit_backoff(attempt);
                warn!(
                    slug,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "token endpoint rate limited"
                );
                if attempts_left {
                    tokio::time::sleep(delay).await;
                }
            }
            FailureClass::Transient => {
                warn!(slug, attempt, error = %err, "token refresh attempt failed");
                if attempts_left {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }

    warn!(slug, attempts = policy.max_attempts, "token refresh attempts exhausted");
    metrics::record_refresh_result("exhausted", started.elapsed());
    Err(Error::RefreshExhausted {
        slug: slug.to_string(),
        attempts: policy.max_attempts,
        last_error,
    })
}

/// Persist `needs_reauth` and produce the matching error. A failed write
/// surfaces as `Store`, since the status was never recorded.
async fn mark_needs_reauth(
    store: &dyn CredentialStore,
    record: &CredentialRecord,
    started: Instant,
) -> Result<String> {
    let slug = record.slug.as_str();
    if let Err(e) = store
        .update(&record.id, CredentialUpdate::status(TokenStatus::NeedsReauth))
        .await
    {
        error!(slug, error = %e, "failed to persist needs_reauth status");
        metrics::record_refresh_result("store_error", started.elapsed());
        return Err(Error::Store(format!(
            "persisting needs_reauth for {slug}: {e}"
        )));
    }
    metrics::record_refresh_result("needs_reauth", started.elapsed());
    Err(Error::NeedsReauth(slug.to_string()))
}
