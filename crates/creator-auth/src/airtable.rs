//! Airtable-backed credential store
//!
//! One row per creator in the `LTK_Credentials` table. Column names are the
//! ones the operators use in the Airtable UI:
//!
//! | Column | Field |
//! |---|---|
//! | `Creator` | display name |
//! | `Slug` | lookup key (falls back to the lowercased first word of `Creator`) |
//! | `Publisher_ID` | partner publisher id |
//! | `Access_Token` / `Refresh_Token` / `ID_Token` | tokens |
//! | `Last_Refreshed` | RFC 3339 timestamp |
//! | `Status` | `active` / `expiring` / `error` / `needs_reauth` |
//!
//! Updates are `PATCH`es carrying only the provided columns, so Airtable
//! leaves every other column untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::constants::{AIRTABLE_API_URL, CREDENTIALS_TABLE};
use crate::credentials::{
    BoxFuture, CredentialRecord, CredentialStore, CredentialUpdate, NewCredential, TokenStatus,
};
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct AirtableRecord {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct AirtableList {
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Credential store over the Airtable REST API.
pub struct AirtableStore {
    client: reqwest::Client,
    table_url: String,
    api_key: String,
}

impl AirtableStore {
    /// Store for the default credentials table on the public Airtable API.
    pub fn new(client: reqwest::Client, base_id: &str, api_key: String) -> Self {
        Self::with_table(client, AIRTABLE_API_URL, base_id, CREDENTIALS_TABLE, api_key)
    }

    pub fn with_table(
        client: reqwest::Client,
        api_url: &str,
        base_id: &str,
        table: &str,
        api_key: String,
    ) -> Self {
        Self {
            client,
            table_url: format!("{}/{base_id}/{table}", api_url.trim_end_matches('/')),
            api_key,
        }
    }

    async fn list(&self, query: &[(&str, String)]) -> Result<AirtableList> {
        let response = self
            .client
            .get(&self.table_url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Store(format!("airtable list request failed: {e}")))?;
        parse_response(response).await
    }

    async fn write(&self, request: reqwest::RequestBuilder, fields: Map<String, Value>) -> Result<AirtableRecord> {
        let response = request
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| Error::Store(format!("airtable write request failed: {e}")))?;
        parse_response(response).await
    }
}

impl CredentialStore for AirtableStore {
    fn get_by_slug<'a>(&'a self, slug: &'a str) -> BoxFuture<'a, Result<Option<CredentialRecord>>> {
        Box::pin(async move {
            let page = self
                .list(&[("filterByFormula", slug_formula(slug)), ("maxRecords", "1".into())])
                .await?;
            Ok(page.records.into_iter().next().map(to_record))
        })
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<CredentialRecord>>> {
        Box::pin(async move {
            let mut records = Vec::new();
            let mut offset: Option<String> = None;
            loop {
                let query: Vec<(&str, String)> = offset
                    .take()
                    .map(|o| vec![("offset", o)])
                    .unwrap_or_default();
                let page = self.list(&query).await?;
                records.extend(page.records.into_iter().map(to_record));
                match page.offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
            debug!(creators = records.len(), "listed airtable credentials");
            Ok(records)
        })
    }

    fn update<'a>(&'a self, id: &'a str, update: CredentialUpdate) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let fields = update_fields(&update);
            let url = format!("{}/{id}", self.table_url);
            self.write(self.client.patch(url), fields).await?;
            debug!(id, "updated airtable credential");
            Ok(())
        })
    }

    fn create(&self, credential: NewCredential) -> BoxFuture<'_, Result<CredentialRecord>> {
        Box::pin(async move {
            let fields = create_fields(&credential);
            let record = self.write(self.client.post(&self.table_url), fields).await?;
            Ok(to_record(record))
        })
    }
}

async fn parse_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::NotFound(format!("airtable record not found: {body}")));
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Store(format!("airtable returned {status}: {body}")));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::CredentialParse(format!("invalid airtable response: {e}")))
}

/// Matches the `Slug` column, or for rows with a blank `Slug` the same
/// first-word-of-`Creator` fallback that `to_record` applies.
fn slug_formula(slug: &str) -> String {
    let slug = slug.replace('"', "\\\"");
    format!(
        "OR({{Slug}} = \"{slug}\", AND({{Slug}} = \"\", \
         LOWER(LEFT(TRIM({{Creator}}), FIND(\" \", TRIM({{Creator}}) & \" \") - 1)) = \"{slug}\"))"
    )
}

fn text(fields: &Map<String, Value>, column: &str) -> Option<String> {
    fields
        .get(column)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn to_record(row: AirtableRecord) -> CredentialRecord {
    let f = &row.fields;
    let creator = text(f, "Creator").unwrap_or_default();
    let slug = text(f, "Slug").unwrap_or_else(|| {
        creator
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
    });
    let status = match text(f, "Status") {
        None => TokenStatus::NeedsReauth,
        Some(raw) => TokenStatus::parse(&raw).unwrap_or_else(|| {
            warn!(id = %row.id, status = %raw, "unknown credential status, treating as error");
            TokenStatus::Error
        }),
    };
    let last_refreshed = text(f, "Last_Refreshed")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    CredentialRecord {
        id: row.id,
        slug,
        creator,
        publisher_id: text(f, "Publisher_ID").unwrap_or_default(),
        access_token: text(f, "Access_Token"),
        refresh_token: text(f, "Refresh_Token").unwrap_or_default(),
        id_token: text(f, "ID_Token"),
        status,
        last_refreshed,
    }
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn update_fields(update: &CredentialUpdate) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(access) = &update.access_token {
        fields.insert("Access_Token".into(), Value::String(access.clone()));
    }
    if let Some(refresh) = &update.refresh_token {
        fields.insert("Refresh_Token".into(), Value::String(refresh.clone()));
    }
    if let Some(status) = update.status {
        fields.insert("Status".into(), Value::String(status.as_str().into()));
    }
    if let Some(at) = update.last_refreshed {
        fields.insert("Last_Refreshed".into(), timestamp(at));
    }
    fields
}

fn create_fields(credential: &NewCredential) -> Map<String, Value> {
    let mut fields = Map::new();
    let mut put = |column: &str, value: &str| {
        if !value.is_empty() {
            fields.insert(column.into(), Value::String(value.into()));
        }
    };
    put("Creator", &credential.creator);
    put("Slug", &credential.slug);
    put("Publisher_ID", &credential.publisher_id);
    put("Access_Token", credential.access_token.as_deref().unwrap_or_default());
    put("Refresh_Token", &credential.refresh_token);
    put("ID_Token", credential.id_token.as_deref().unwrap_or_default());
    put(
        "Status",
        credential.status.unwrap_or(TokenStatus::Active).as_str(),
    );
    fields
}
