//! In-memory doubles for the store and the authorization endpoint

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use creator_auth::{
    BoxFuture, CredentialRecord, CredentialStore, CredentialUpdate, NewCredential, TokenEndpoint,
    TokenResponse, TokenStatus,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Unsigned JWT whose `exp` is `secs` from now (negative for the past).
pub fn token_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::json!({ "exp": exp, "sub": "creator" }).to_string());
    format!("{header}.{payload}.sig")
}

pub fn record(slug: &str, access_token: Option<&str>, refresh_token: &str) -> CredentialRecord {
    CredentialRecord {
        id: format!("rec_{slug}"),
        creator: slug.to_string(),
        slug: slug.to_string(),
        publisher_id: String::new(),
        access_token: access_token.map(str::to_string),
        refresh_token: refresh_token.to_string(),
        id_token: None,
        status: TokenStatus::Active,
        last_refreshed: None,
    }
}

/// Store that keeps records in memory and logs every update.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CredentialRecord>>,
    updates: Mutex<Vec<(String, CredentialUpdate)>>,
    fail_updates: AtomicBool,
    fail_reads: AtomicBool,
    read_delays: Mutex<VecDeque<Duration>>,
}

impl MemoryStore {
    pub fn with(records: Vec<CredentialRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            ..Self::default()
        })
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay the next `get_by_slug` calls, one entry each. The record is
    /// snapshotted when the call starts, so a delayed read can return stale
    /// data.
    pub fn delay_reads(&self, delays: Vec<Duration>) {
        self.read_delays.lock().extend(delays);
    }

    /// Current record for `slug`; panics when absent.
    pub fn get(&self, slug: &str) -> CredentialRecord {
        self.records
            .lock()
            .iter()
            .find(|r| r.slug == slug)
            .cloned()
            .unwrap_or_else(|| panic!("no record for {slug}"))
    }

    /// Successful updates, in order.
    pub fn updates(&self) -> Vec<(String, CredentialUpdate)> {
        self.updates.lock().clone()
    }

    /// Successful updates that wrote a new token pair.
    pub fn token_writes(&self) -> usize {
        self.updates.lock().iter().filter(|(_, u)| u.has_tokens()).count()
    }

    fn read_guard(&self) -> creator_auth::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(creator_auth::Error::Store("store unavailable".into()));
        }
        Ok(())
    }
}

impl CredentialStore for MemoryStore {
    fn get_by_slug<'a>(
        &'a self,
        slug: &'a str,
    ) -> BoxFuture<'a, creator_auth::Result<Option<CredentialRecord>>> {
        Box::pin(async move {
            self.read_guard()?;
            let snapshot = self.records.lock().iter().find(|r| r.slug == slug).cloned();
            let delay = self.read_delays.lock().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(snapshot)
        })
    }

    fn get_all(&self) -> BoxFuture<'_, creator_auth::Result<Vec<CredentialRecord>>> {
        Box::pin(async move {
            self.read_guard()?;
            Ok(self.records.lock().clone())
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        update: CredentialUpdate,
    ) -> BoxFuture<'a, creator_auth::Result<()>> {
        Box::pin(async move {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(creator_auth::Error::Store("write rejected".into()));
            }
            let mut records = self.records.lock();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| creator_auth::Error::NotFound(format!("record {id}")))?;
            record.apply(&update);
            self.updates.lock().push((id.to_string(), update));
            Ok(())
        })
    }

    fn create(
        &self,
        credential: NewCredential,
    ) -> BoxFuture<'_, creator_auth::Result<CredentialRecord>> {
        Box::pin(async move {
            let mut created = record(
                &credential.slug,
                credential.access_token.as_deref(),
                &credential.refresh_token,
            );
            created.creator = credential.creator;
            if let Some(status) = credential.status {
                created.status = status;
            }
            self.records.lock().push(created.clone());
            Ok(created)
        })
    }
}

/// One scripted endpoint response.
#[derive(Debug, Clone, Copy)]
pub enum Step<'a> {
    Tokens(&'a str, &'a str),
    RateLimited,
    InvalidGrant,
    Transient,
}

enum Scripted {
    Tokens(String, String),
    RateLimited,
    InvalidGrant,
    Transient,
}

impl From<Step<'_>> for Scripted {
    fn from(step: Step<'_>) -> Self {
        match step {
            Step::Tokens(access, refresh) => Scripted::Tokens(access.into(), refresh.into()),
            Step::RateLimited => Scripted::RateLimited,
            Step::InvalidGrant => Scripted::InvalidGrant,
            Step::Transient => Scripted::Transient,
        }
    }
}

/// Endpoint that replays a fixed script. Once the script runs out every call
/// fails transiently.
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<Scripted>>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedEndpoint {
    pub fn new(steps: Vec<Step<'_>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().map(Scripted::from).collect()),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Delay every response by `latency`.
    pub fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        *self.latency.lock() = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl TokenEndpoint for ScriptedEndpoint {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, creator_auth::Result<TokenResponse>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().push(Instant::now());
            self.seen.lock().push(refresh_token.to_string());
            let step = self.script.lock().pop_front();
            let latency = *self.latency.lock();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            match step {
                Some(Scripted::Tokens(access_token, refresh_token)) => Ok(TokenResponse {
                    access_token,
                    refresh_token,
                    token_type: Some("Bearer".into()),
                    expires_in: Some(3600),
                }),
                Some(Scripted::RateLimited) => Err(creator_auth::Error::RateLimited(
                    "token endpoint returned 429".into(),
                )),
                Some(Scripted::InvalidGrant) => Err(creator_auth::Error::InvalidGrant(
                    "refresh token revoked".into(),
                )),
                Some(Scripted::Transient) | None => {
                    Err(creator_auth::Error::Http("connection reset by peer".into()))
                }
            }
        })
    }
}
