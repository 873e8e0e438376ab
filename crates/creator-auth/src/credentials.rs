//! Creator credential records and the store adapter contract
//!
//! A credential record maps a creator slug to the OAuth tokens used for the
//! partner APIs. Records are mutated only through [`CredentialStore::update`],
//! which writes the fields present in a [`CredentialUpdate`] and leaves the
//! rest untouched.
//!
//! [`FileCredentialStore`] keeps the table in a local JSON file. All writes use
//! atomic temp-file + rename so a crash mid-write never leaves a torn file, and
//! a tokio Mutex serializes concurrent writers.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boxed future returned by the dyn-compatible store and endpoint traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle status of a stored credential.
///
/// `NeedsReauth` is terminal for automatic refresh: only a manual credential
/// capture moves a record out of it. `Expiring` is a valid persisted value
/// that nothing assigns yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Expiring,
    Error,
    NeedsReauth,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Expiring => "expiring",
            TokenStatus::Error => "error",
            TokenStatus::NeedsReauth => "needs_reauth",
        }
    }

    /// Parse a stored status value. Unknown values are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(TokenStatus::Active),
            "expiring" => Some(TokenStatus::Expiring),
            "error" => Some(TokenStatus::Error),
            "needs_reauth" => Some(TokenStatus::NeedsReauth),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One creator's stored credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Opaque row handle assigned by the store
    pub id: String,
    /// Display name of the creator
    #[serde(default)]
    pub creator: String,
    /// Lookup key, unique among active records
    pub slug: String,
    #[serde(default)]
    pub publisher_id: String,
    /// Current bearer token, if one has ever been captured
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    /// A row without a status has never been connected
    #[serde(default = "status_when_missing")]
    pub status: TokenStatus,
    /// Last successful refresh (advisory)
    #[serde(default)]
    pub last_refreshed: Option<DateTime<Utc>>,
}

fn status_when_missing() -> TokenStatus {
    TokenStatus::NeedsReauth
}

impl CredentialRecord {
    /// Apply a partial update in place. Absent fields are left unchanged.
    pub fn apply(&mut self, update: &CredentialUpdate) {
        if let Some(access) = &update.access_token {
            self.access_token = Some(access.clone());
        }
        if let Some(refresh) = &update.refresh_token {
            self.refresh_token = refresh.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(at) = update.last_refreshed {
            self.last_refreshed = Some(at);
        }
    }
}

/// Partial update of a credential record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub status: Option<TokenStatus>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl CredentialUpdate {
    /// New token pair after a successful refresh or a manual capture.
    pub fn tokens(access: String, refresh: String, at: DateTime<Utc>) -> Self {
        Self {
            access_token: Some(access),
            refresh_token: Some(refresh),
            status: Some(TokenStatus::Active),
            last_refreshed: Some(at),
        }
    }

    /// Status-only write.
    pub fn status(status: TokenStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether the update carries new tokens.
    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }
}

/// Fields for creating a new credential row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCredential {
    pub creator: String,
    pub slug: String,
    #[serde(default)]
    pub publisher_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub status: Option<TokenStatus>,
}

impl NewCredential {
    fn into_record(self, id: String) -> CredentialRecord {
        CredentialRecord {
            id,
            creator: self.creator,
            slug: self.slug,
            publisher_id: self.publisher_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            status: self.status.unwrap_or(TokenStatus::Active),
            last_refreshed: None,
        }
    }
}

/// Durable store of creator credentials.
///
/// Uses `Pin<Box<dyn Future>>` return types so stores can be shared as
/// `Arc<dyn CredentialStore>`.
pub trait CredentialStore: Send + Sync {
    /// Look up the record for a slug. `Ok(None)` when absent.
    fn get_by_slug<'a>(&'a self, slug: &'a str) -> BoxFuture<'a, Result<Option<CredentialRecord>>>;

    /// All records, in store order.
    fn get_all(&self) -> BoxFuture<'_, Result<Vec<CredentialRecord>>>;

    /// Overwrite the provided fields of record `id`.
    fn update<'a>(&'a self, id: &'a str, update: CredentialUpdate) -> BoxFuture<'a, Result<()>>;

    /// Insert a new record and return it with its assigned id.
    fn create(&self, credential: NewCredential) -> BoxFuture<'_, Result<CredentialRecord>>;
}

/// Credential table kept in a local JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Vec<CredentialRecord>>,
}

impl FileCredentialStore {
    /// Load the table from `path`, creating an empty one if the file is missing.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let records: Vec<CredentialRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), creators = records.len(), "loaded credentials");
            records
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let records = Vec::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CredentialStore for FileCredentialStore {
    fn get_by_slug<'a>(&'a self, slug: &'a str) -> BoxFuture<'a, Result<Option<CredentialRecord>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.iter().find(|r| r.slug == slug).cloned())
        })
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<CredentialRecord>>> {
        Box::pin(async move { Ok(self.state.lock().await.clone()) })
    }

    fn update<'a>(&'a self, id: &'a str, update: CredentialUpdate) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            // Only replace the in-memory table once the file write succeeded
            let mut next = state.clone();
            let record = next
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| Error::NotFound(format!("record {id} not in credential store")))?;
            record.apply(&update);
            debug!(id, slug = %record.slug, "updated credential");
            write_atomic(&self.path, &next).await?;
            *state = next;
            Ok(())
        })
    }

    fn create(&self, credential: NewCredential) -> BoxFuture<'_, Result<CredentialRecord>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.iter().any(|r| r.slug == credential.slug) {
                return Err(Error::Store(format!(
                    "slug {} already has a credential record",
                    credential.slug
                )));
            }
            let record = credential.into_record(format!("rec{}", uuid::Uuid::new_v4().simple()));
            let mut next = state.clone();
            next.push(record.clone());
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(id = %record.id, slug = %record.slug, "created credential");
            Ok(record)
        })
    }
}

/// Write the table to a file atomically with 0600 permissions.
async fn write_atomic(path: &Path, data: &[CredentialRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_credential(slug: &str) -> NewCredential {
        NewCredential {
            creator: format!("Creator {slug}"),
            slug: slug.into(),
            publisher_id: format!("pub-{slug}"),
            access_token: Some(format!("at_{slug}")),
            refresh_token: format!("rt_{slug}"),
            ..NewCredential::default()
        }
    }

    #[tokio::test]
    async fn roundtrip_create_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        let created = store.create(new_credential("nicki")).await.unwrap();
        assert!(created.id.starts_with("rec"));
        assert_eq!(created.status, TokenStatus::Active);

        let store2 = FileCredentialStore::load(path).await.unwrap();
        let record = store2.get_by_slug("nicki").await.unwrap().unwrap();
        assert_eq!(record, created);
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        assert!(!path.exists());
        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<CredentialRecord> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn get_by_slug_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::load(dir.path().join("c.json"))
            .await
            .unwrap();
        store.create(new_credential("a")).await.unwrap();

        assert!(store.get_by_slug("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_writes_only_provided_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::load(dir.path().join("c.json"))
            .await
            .unwrap();
        let created = store.create(new_credential("a")).await.unwrap();

        store
            .update(&created.id, CredentialUpdate::status(TokenStatus::NeedsReauth))
            .await
            .unwrap();

        let record = store.get_by_slug("a").await.unwrap().unwrap();
        assert_eq!(record.status, TokenStatus::NeedsReauth);
        assert_eq!(record.access_token.as_deref(), Some("at_a"));
        assert_eq!(record.refresh_token, "rt_a");
        assert!(record.last_refreshed.is_none());
    }

    #[tokio::test]
    async fn update_tokens_sets_active_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::load(dir.path().join("c.json"))
            .await
            .unwrap();
        let created = store.create(new_credential("a")).await.unwrap();
        store
            .update(&created.id, CredentialUpdate::status(TokenStatus::Error))
            .await
            .unwrap();

        let now = Utc::now();
        store
            .update(
                &created.id,
                CredentialUpdate::tokens("at_new".into(), "rt_new".into(), now),
            )
            .await
            .unwrap();

        let record = store.get_by_slug("a").await.unwrap().unwrap();
        assert_eq!(record.access_token.as_deref(), Some("at_new"));
        assert_eq!(record.refresh_token, "rt_new");
        assert_eq!(record.status, TokenStatus::Active);
        assert_eq!(record.last_refreshed, Some(now));
    }

    #[tokio::test]
    async fn update_unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::load(dir.path().join("c.json"))
            .await
            .unwrap();

        let result = store
            .update("recmissing", CredentialUpdate::status(TokenStatus::Active))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_slug() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::load(dir.path().join("c.json"))
            .await
            .unwrap();
        store.create(new_credential("a")).await.unwrap();

        let result = store.create(new_credential("a")).await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn get_all_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::load(dir.path().join("c.json"))
            .await
            .unwrap();
        store.create(new_credential("b")).await.unwrap();
        store.create(new_credential("a")).await.unwrap();

        let slugs: Vec<String> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.slug)
            .collect();
        assert_eq!(slugs, vec!["b", "a"]);
    }

    #[test]
    fn missing_status_reads_as_needs_reauth() {
        let json = r#"{"id":"rec1","slug":"a","refresh_token":"rt"}"#;
        let record: CredentialRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, TokenStatus::NeedsReauth);
        assert!(record.access_token.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TokenStatus::NeedsReauth).unwrap();
        assert_eq!(json, "\"needs_reauth\"");
        assert_eq!(TokenStatus::parse("expiring"), Some(TokenStatus::Expiring));
        assert_eq!(TokenStatus::parse("bogus"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.create(new_credential("a")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_creates_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(FileCredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create(new_credential(&format!("creator-{i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 10);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<CredentialRecord> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
