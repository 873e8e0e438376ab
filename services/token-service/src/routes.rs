//! Operator HTTP endpoints
//!
//! Endpoints:
//! - GET  /health              : per-creator credential status, never tokens
//! - POST /tokens/refresh      : get a valid token for one slug, refreshing if needed
//! - POST /connect             : manual credential capture, the only way out of `needs_reauth`
//! - GET  /cron/refresh-tokens : sweep every creator (Bearer `CRON_SECRET`)
//! - GET  /affiliate/token     : client-credentials token for the affiliate API
//! - GET  /metrics             : Prometheus text format

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use common::{Secret, preview};
use creator_auth::{ClientCredentialsCache, CredentialUpdate};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use token_lifecycle::TokenManager;
use tracing::{info, warn};

use crate::error::ApiError;

/// Characters of a token shown in responses.
const TOKEN_PREVIEW_LEN: usize = 20;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TokenManager>,
    pub cron_secret: Option<Secret<String>>,
    pub affiliate: Option<Arc<ClientCredentialsCache>>,
    pub prometheus: PrometheusHandle,
}

/// Build the router with all operator endpoints.
///
/// A concurrency limit layer caps in-flight requests at `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tokens/refresh", post(refresh_token))
        .route("/connect", post(connect))
        .route("/cron/refresh-tokens", get(cron_refresh))
        .route("/affiliate/token", get(affiliate_token))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

/// GET /health: status of every stored credential.
async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let records = state.manager.store().get_all().await?;
    let creators: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "slug": r.slug,
                "creator": r.creator,
                "status": r.status,
                "last_refreshed": r.last_refreshed,
                "publisher_id": r.publisher_id,
            })
        })
        .collect();

    Ok(Json(json!({
        "creators": creators,
        "timestamp": timestamp(),
    })))
}

#[derive(Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    slug: Option<String>,
}

/// POST /tokens/refresh: hand out a valid token preview for one creator.
async fn refresh_token(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let slug = required("slug", body.slug)?;
    let token = state.manager.get_valid_token(&slug).await?;

    Ok(Json(json!({
        "success": true,
        "slug": slug,
        "token_preview": preview(&token, TOKEN_PREVIEW_LEN),
    })))
}

#[derive(Deserialize)]
struct ConnectRequest {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// POST /connect: store manually captured tokens and mark the creator active.
async fn connect(
    State(state): State<AppState>,
    Json(body): Json<ConnectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let slug = required("slug", body.slug)?;
    let access_token = required("access_token", body.access_token)?;
    let refresh_token = required("refresh_token", body.refresh_token)?;

    let store = state.manager.store();
    let record = store
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no credential record for slug {slug}")))?;

    store
        .update(
            &record.id,
            CredentialUpdate::tokens(access_token, refresh_token, Utc::now()),
        )
        .await?;

    info!(slug = %slug, previous_status = %record.status, "credentials connected");

    Ok(Json(json!({
        "success": true,
        "slug": slug,
        "status": "active",
    })))
}

/// GET /cron/refresh-tokens: run the refresh sweep.
///
/// Without a configured `CRON_SECRET` every request is rejected.
async fn cron_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = match (&state.cron_secret, presented) {
        (Some(secret), Some(token)) => secret.matches(token),
        _ => false,
    };
    if !authorized {
        warn!("rejected cron request with missing or invalid secret");
        return Err(ApiError::Unauthorized);
    }

    let results = token_lifecycle::refresh_all(&state.manager).await?;
    let results: serde_json::Map<_, _> = results
        .into_iter()
        .map(|(slug, outcome)| (slug, json!(outcome.to_string())))
        .collect();

    Ok(Json(json!({
        "results": results,
        "timestamp": timestamp(),
    })))
}

#[derive(Deserialize)]
struct AffiliateQuery {
    #[serde(default = "default_affiliate_key")]
    key: String,
}

fn default_affiliate_key() -> String {
    "default".to_string()
}

/// GET /affiliate/token: cached client-credentials token for the affiliate API.
async fn affiliate_token(
    State(state): State<AppState>,
    Query(query): Query<AffiliateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let cache = state
        .affiliate
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("affiliate API is not configured".into()))?;
    let token = cache.get_token(&query.key).await?;

    Ok(Json(json!({
        "success": true,
        "token_preview": preview(&token, TOKEN_PREVIEW_LEN),
    })))
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
