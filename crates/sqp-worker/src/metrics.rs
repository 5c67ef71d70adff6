//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const VIDEOS_PROCESSED_TOTAL: &str = "sqp_videos_processed_total";
    pub const VIDEOS_FAILED_TOTAL: &str = "sqp_videos_failed_total";
    pub const DETECTION_DURATION_SECONDS: &str = "sqp_detection_duration_seconds";
    pub const CHUNKS_TRACKED_TOTAL: &str = "sqp_chunks_tracked_total";
    pub const CHUNKS_FAILED_TOTAL: &str = "sqp_chunks_failed_total";
    pub const CHUNK_TRACKING_DURATION_SECONDS: &str = "sqp_chunk_tracking_duration_seconds";
    pub const ARTIFACTS_PERSISTED_TOTAL: &str = "sqp_artifacts_persisted_total";
}

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: &str) -> WorkerResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| WorkerError::config_error(format!("invalid metrics address '{}': {}", addr, e)))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_video_processed(segmented: bool) {
    let labels = [("segmented", segmented.to_string())];
    counter!(names::VIDEOS_PROCESSED_TOTAL, &labels).increment(1);
}

pub fn record_video_failed(error: &WorkerError) {
    let labels = [("kind", error.kind().to_string())];
    counter!(names::VIDEOS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_detection(duration_secs: f64) {
    histogram!(names::DETECTION_DURATION_SECONDS).record(duration_secs);
}

pub fn record_chunk_tracked(backend: &'static str, duration_secs: f64, artifacts: usize) {
    let labels = [("backend", backend.to_string())];
    counter!(names::CHUNKS_TRACKED_TOTAL, &labels).increment(1);
    histogram!(names::CHUNK_TRACKING_DURATION_SECONDS, &labels).record(duration_secs);
    counter!(names::ARTIFACTS_PERSISTED_TOTAL).increment(artifacts as u64);
}

pub fn record_chunk_failed(backend: &'static str) {
    let labels = [("backend", backend.to_string())];
    counter!(names::CHUNKS_FAILED_TOTAL, &labels).increment(1);
}
