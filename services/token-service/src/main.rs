//! Creator Token Service
//!
//! Single-binary service that:
//! 1. Loads creator credentials from a file or Airtable
//! 2. Hands out valid partner access tokens, refreshing them on demand
//! 3. Sweeps every creator in the background before tokens expire
//! 4. Exposes health, manual credential capture and metrics endpoints

mod config;
mod error;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use creator_auth::{
    AirtableStore, ClientCredentialsCache, CredentialStore, FileCredentialStore, HttpTokenEndpoint,
};
use tokio::net::TcpListener;
use token_lifecycle::TokenManager;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, StoreBackend};
use crate::routes::{AppState, build_router};

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on any single partner HTTP request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting creator-token-service");

    // Installed before the manager exists so no refresh metric is lost
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.service.listen_addr,
        token_endpoint = %config.auth.token_endpoint,
        store = ?config.store.backend,
        refresh_interval_secs = config.refresh.interval_secs,
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let store = build_store(&config, client.clone()).await?;
    let endpoint = Arc::new(HttpTokenEndpoint::new(
        client.clone(),
        config.auth.token_endpoint.clone(),
        config.auth.client_id.clone(),
    ));
    let manager = Arc::new(TokenManager::new(store, endpoint, config.auth.policy()));

    let refresh_task = if config.refresh.interval_secs > 0 {
        Some(token_lifecycle::spawn_refresh_task(
            manager.clone(),
            Duration::from_secs(config.refresh.interval_secs),
        ))
    } else {
        info!("background refresh disabled");
        None
    };

    let affiliate = config.affiliate.as_ref().map(|affiliate| {
        Arc::new(ClientCredentialsCache::with_endpoint(
            client.clone(),
            affiliate.token_endpoint.clone(),
            affiliate.scope.clone(),
            config.secrets.affiliate_client_id.as_ref().map(|s| s.expose().clone()),
            config
                .secrets
                .affiliate_client_secret
                .as_ref()
                .map(|s| s.expose().clone()),
        ))
    });

    if config.secrets.cron_secret.is_none() {
        warn!("CRON_SECRET not set, /cron/refresh-tokens will reject every request");
    }

    let state = AppState {
        manager,
        cron_secret: config.secrets.cron_secret.clone(),
        affiliate,
        prometheus: prometheus_handle,
    };
    let app = build_router(state, config.service.max_connections);

    let listen_addr = config.service.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    if let Some(task) = refresh_task {
        task.abort();
    }
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Open the configured credential store.
async fn build_store(config: &Config, client: reqwest::Client) -> Result<Arc<dyn CredentialStore>> {
    match config.store.backend {
        StoreBackend::File => {
            let store = FileCredentialStore::load(config.store.path.clone())
                .await
                .with_context(|| {
                    format!(
                        "failed to open credential file {}",
                        config.store.path.display()
                    )
                })?;
            info!(
                path = %config.store.path.display(),
                creators = store.len().await,
                "file credential store loaded"
            );
            let store: Arc<dyn CredentialStore> = Arc::new(store);
            Ok(store)
        }
        StoreBackend::Airtable => {
            // Both are checked by Config::validate
            let api_key = config
                .secrets
                .airtable_api_key
                .as_ref()
                .context("AIRTABLE_API_KEY is not set")?;
            let base_id = config
                .store
                .base_id
                .as_deref()
                .context("AIRTABLE_BASE_ID is not set")?;
            info!(base_id, table = %config.store.table, "using airtable credential store");
            let store: Arc<dyn CredentialStore> = Arc::new(AirtableStore::with_table(
                client,
                &config.store.api_url,
                base_id,
                &config.store.table,
                api_key.expose().clone(),
            ));
            Ok(store)
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
