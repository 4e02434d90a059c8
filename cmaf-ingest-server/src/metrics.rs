//! Prometheus-compatible metrics endpoint, re-themed from the teacher's
//! transcode/cache counters to ingest counters: requests, bytes received,
//! segments written/dropped, errors by kind.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::state::AppState;

#[derive(Debug)]
pub struct Metrics {
    start_time: Instant,
    request_count: RwLock<u64>,
    requests_by_endpoint: RwLock<HashMap<String, u64>>,
    bytes_received: RwLock<u64>,
    segments_written: RwLock<u64>,
    segments_dropped: RwLock<u64>,
    active_channels: RwLock<u64>,
    errors_by_type: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            request_count: RwLock::new(0),
            requests_by_endpoint: RwLock::new(HashMap::new()),
            bytes_received: RwLock::new(0),
            segments_written: RwLock::new(0),
            segments_dropped: RwLock::new(0),
            active_channels: RwLock::new(0),
            errors_by_type: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_request(&self, endpoint: &str) {
        *self.request_count.write() += 1;
        *self
            .requests_by_endpoint
            .write()
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_bytes_received(&self, bytes: u64) {
        *self.bytes_received.write() += bytes;
    }

    pub fn record_segment_written(&self) {
        *self.segments_written.write() += 1;
    }

    pub fn record_segment_dropped(&self) {
        *self.segments_dropped.write() += 1;
    }

    pub fn set_active_channels(&self, count: u64) {
        *self.active_channels.write() = count;
    }

    pub fn record_error(&self, error_type: &str) {
        *self
            .errors_by_type
            .write()
            .entry(error_type.to_string())
            .or_insert(0) += 1;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP cmaf_ingest_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE cmaf_ingest_uptime_seconds counter\n");
        output.push_str(&format!("cmaf_ingest_uptime_seconds {}\n", self.uptime_secs()));

        output.push_str("\n# HELP cmaf_ingest_requests_total Total number of HTTP requests\n");
        output.push_str("# TYPE cmaf_ingest_requests_total counter\n");
        output.push_str(&format!("cmaf_ingest_requests_total {}\n", *self.request_count.read()));

        output.push_str("\n# HELP cmaf_ingest_requests_by_endpoint Requests by endpoint\n");
        output.push_str("# TYPE cmaf_ingest_requests_by_endpoint counter\n");
        for (endpoint, count) in self.requests_by_endpoint.read().iter() {
            output.push_str(&format!(
                "cmaf_ingest_requests_by_endpoint{{endpoint=\"{}\"}} {}\n",
                endpoint, count
            ));
        }

        output.push_str("\n# HELP cmaf_ingest_bytes_received_total Total bytes received\n");
        output.push_str("# TYPE cmaf_ingest_bytes_received_total counter\n");
        output.push_str(&format!(
            "cmaf_ingest_bytes_received_total {}\n",
            *self.bytes_received.read()
        ));

        output.push_str("\n# HELP cmaf_ingest_segments_written_total Segments written to disk\n");
        output.push_str("# TYPE cmaf_ingest_segments_written_total counter\n");
        output.push_str(&format!(
            "cmaf_ingest_segments_written_total {}\n",
            *self.segments_written.read()
        ));

        output.push_str("\n# HELP cmaf_ingest_segments_dropped_total Segments dropped (ProtocolSemantic)\n");
        output.push_str("# TYPE cmaf_ingest_segments_dropped_total counter\n");
        output.push_str(&format!(
            "cmaf_ingest_segments_dropped_total {}\n",
            *self.segments_dropped.read()
        ));

        output.push_str("\n# HELP cmaf_ingest_active_channels Number of active channels\n");
        output.push_str("# TYPE cmaf_ingest_active_channels gauge\n");
        output.push_str(&format!(
            "cmaf_ingest_active_channels {}\n",
            *self.active_channels.read()
        ));

        output.push_str("\n# HELP cmaf_ingest_errors_total Total errors by type\n");
        output.push_str("# TYPE cmaf_ingest_errors_total counter\n");
        for (error_type, count) in self.errors_by_type.read().iter() {
            output.push_str(&format!(
                "cmaf_ingest_errors_total{{type=\"{}\"}} {}\n",
                error_type, count
            ));
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let prometheus_output = state.metrics.export_prometheus();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        prometheus_output,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.uptime_secs() < 2);
    }

    #[test]
    fn test_record_request() {
        let metrics = Metrics::new();
        metrics.record_request("/upload/live1/video/101.cmfv");
        metrics.record_request("/upload/live1/video/101.cmfv");

        assert_eq!(*metrics.request_count.read(), 2);
    }

    #[test]
    fn test_segment_counters() {
        let metrics = Metrics::new();
        metrics.record_segment_written();
        metrics.record_segment_written();
        metrics.record_segment_dropped();

        assert_eq!(*metrics.segments_written.read(), 2);
        assert_eq!(*metrics.segments_dropped.read(), 1);
    }

    #[test]
    fn test_export_prometheus() {
        let metrics = Metrics::new();
        metrics.record_request("/upload/live1/video/101.cmfv");
        metrics.record_bytes_received(4096);

        let output = metrics.export_prometheus();
        assert!(output.contains("cmaf_ingest_requests_total"));
        assert!(output.contains("cmaf_ingest_bytes_received_total"));
    }

    #[test]
    fn test_error_recording() {
        let metrics = Metrics::new();
        metrics.record_error("bad_url");
        metrics.record_error("bad_url");
        metrics.record_error("auth_invalid");

        let errors = metrics.errors_by_type.read();
        assert_eq!(errors.get("bad_url"), Some(&2));
        assert_eq!(errors.get("auth_invalid"), Some(&1));
    }
}
