//! Refresh metrics
//!
//! Emitted through the `metrics` facade; the service binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.
//!
//! - `token_requests_total` (counter): label `source` (cached, refreshed, coalesced, needs_reauth)
//! - `token_refresh_attempts_total` (counter): label `outcome` (success, rate_limited, invalid_grant, transient)
//! - `token_refresh_total` (counter): label `result` (success, needs_reauth, exhausted, store_error)
//! - `token_refresh_duration_seconds` (histogram): label `result`

use std::time::Duration;

pub const REFRESH_DURATION_METRIC: &str = "token_refresh_duration_seconds";

pub fn record_token_request(source: &'static str) {
    metrics::counter!("token_requests_total", "source" => source).increment(1);
}

pub fn record_refresh_attempt(outcome: &'static str) {
    metrics::counter!("token_refresh_attempts_total", "outcome" => outcome).increment(1);
}

/// Record the end of a refresh operation (all attempts included).
pub fn record_refresh_result(result: &'static str, elapsed: Duration) {
    metrics::counter!("token_refresh_total", "result" => result).increment(1);
    metrics::histogram!(REFRESH_DURATION_METRIC, "result" => result).record(elapsed.as_secs_f64());
}
