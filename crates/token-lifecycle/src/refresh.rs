//! Refresh sweep over every stored creator
//!
//! Calls `get_valid_token` for each record so tokens nearing expiry are
//! rotated ahead of request time. Records already in `needs_reauth` are
//! skipped; the rest go through the same coalescing path as any caller, so a
//! sweep racing a request for the same slug still makes one refresh call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use creator_auth::TokenStatus;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manager::TokenManager;

/// Outcome of one record in a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Ok,
    Skipped,
    Failed(String),
}

impl fmt::Display for SweepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepOutcome::Ok => f.write_str("ok"),
            SweepOutcome::Skipped => f.write_str("skipped"),
            SweepOutcome::Failed(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Visit every record, one after another, and report per-slug outcomes.
///
/// Fails only when the store cannot list its records.
pub async fn refresh_all(manager: &TokenManager) -> Result<BTreeMap<String, SweepOutcome>> {
    let records = manager
        .store()
        .get_all()
        .await
        .map_err(|e| Error::Store(format!("listing credentials: {e}")))?;

    let mut results = BTreeMap::new();
    for record in records {
        let outcome = if record.status == TokenStatus::NeedsReauth {
            debug!(slug = %record.slug, "skipping creator awaiting re-authentication");
            SweepOutcome::Skipped
        } else {
            match manager.get_valid_token(&record.slug).await {
                Ok(_) => SweepOutcome::Ok,
                Err(e) => {
                    warn!(slug = %record.slug, error = %e, "sweep refresh failed");
                    SweepOutcome::Failed(e.to_string())
                }
            }
        };
        results.insert(record.slug, outcome);
    }

    let failed = results
        .values()
        .filter(|o| matches!(o, SweepOutcome::Failed(_)))
        .count();
    info!(creators = results.len(), failed, "refresh sweep complete");
    Ok(results)
}

/// Spawn a background task that runs [`refresh_all`] every `interval`.
///
/// The immediate first tick is skipped; a failed sweep is logged and the
/// next tick tries again.
pub fn spawn_refresh_task(
    manager: Arc<TokenManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = refresh_all(&manager).await {
                warn!(error = %e, "refresh sweep failed");
            }
        }
    })
}
