//! Prometheus metrics exposition
//!
//! The refresh metrics themselves are emitted by `token_lifecycle::metrics`;
//! this module installs the process-wide recorder they report to.

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use token_lifecycle::metrics::REFRESH_DURATION_METRIC;

/// Refresh durations span a single fast round trip up to several backoffs.
const REFRESH_DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REFRESH_DURATION_METRIC.to_string()),
            REFRESH_DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `token_refresh_duration_seconds` gets explicit buckets so it renders as a
/// histogram with `_bucket` lines rather than the default summary.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
