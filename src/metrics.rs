//! Prometheus metrics for the sidecar.
//!
//! Defines metric name constants and installs a global Prometheus recorder
//! with its own HTTP scrape listener via `metrics-exporter-prometheus`.
//! Without an installed recorder the `counter!` calls in the workers are
//! no-ops.

use std::net::SocketAddr;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;

// -- Metric name constants ----------------------------------------------------

/// Upload attempts (counter). Labels: kind, outcome.
pub const UPLOADS_TOTAL: &str = "s3sidecar_uploads_total";

/// Bytes successfully uploaded (counter). Labels: kind.
pub const UPLOAD_BYTES_TOTAL: &str = "s3sidecar_upload_bytes_total";

/// Stream cycles skipped because the source file was absent (counter).
pub const MISSING_SOURCE_TOTAL: &str = "s3sidecar_missing_source_total";

/// Failed connection attempts (counter).
pub const CONNECT_FAILURES_TOTAL: &str = "s3sidecar_connect_failures_total";

/// Local files deleted after backup (counter).
pub const BACKUPS_CLEARED_TOTAL: &str = "s3sidecar_backups_cleared_total";

// -- Global recorder installation ---------------------------------------------

/// Install the Prometheus recorder and start its scrape listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(UPLOADS_TOTAL, "Upload attempts by stream kind and outcome");
    describe_counter!(UPLOAD_BYTES_TOTAL, "Bytes uploaded by stream kind");
    describe_counter!(
        MISSING_SOURCE_TOTAL,
        "Stream cycles skipped because the source file was missing"
    );
    describe_counter!(CONNECT_FAILURES_TOTAL, "Failed object store connection attempts");
    describe_counter!(BACKUPS_CLEARED_TOTAL, "Local files removed after backup");
}

// -- Recording helpers ---------------------------------------------------------

/// Record one upload attempt.
pub fn record_upload(kind: &'static str, bytes: Option<usize>) {
    match bytes {
        Some(len) => {
            counter!(UPLOADS_TOTAL, "kind" => kind, "outcome" => "success").increment(1);
            counter!(UPLOAD_BYTES_TOTAL, "kind" => kind).increment(len as u64);
        }
        None => {
            counter!(UPLOADS_TOTAL, "kind" => kind, "outcome" => "failure").increment(1);
        }
    }
}

pub fn record_missing_source() {
    counter!(MISSING_SOURCE_TOTAL).increment(1);
}

pub fn record_connect_failure() {
    counter!(CONNECT_FAILURES_TOTAL).increment(1);
}

pub fn record_backup_cleared() {
    counter!(BACKUPS_CLEARED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            UPLOADS_TOTAL,
            UPLOAD_BYTES_TOTAL,
            MISSING_SOURCE_TOTAL,
            CONNECT_FAILURES_TOTAL,
            BACKUPS_CLEARED_TOTAL,
        ] {
            assert!(name.starts_with("s3sidecar_"), "{name}");
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_upload("stream", Some(5));
        record_upload("backup", None);
        record_missing_source();
        record_connect_failure();
        record_backup_cleared();
    }
}
