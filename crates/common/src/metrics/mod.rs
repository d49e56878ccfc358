//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all deposition engine metrics
pub const METRICS_PREFIX: &str = "zenodo";

/// SLO-aligned histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for the publication pipeline (several commits plus file snapshots)
pub const PUBLISH_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Publication metrics
    describe_counter!(
        format!("{}_publications_total", METRICS_PREFIX),
        Unit::Count,
        "Publication attempts by outcome"
    );

    describe_histogram!(
        format!("{}_publish_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Publication pipeline latency in seconds"
    );

    // PID metrics
    describe_counter!(
        format!("{}_pid_operations_total", METRICS_PREFIX),
        Unit::Count,
        "Persistent identifier operations by action and outcome"
    );

    // Task metrics
    describe_counter!(
        format!("{}_tasks_total", METRICS_PREFIX),
        Unit::Count,
        "Asynchronous tasks executed by name and outcome"
    );

    describe_histogram!(
        format!("{}_task_attempts", METRICS_PREFIX),
        Unit::Count,
        "Attempts needed to finish a task"
    );

    describe_gauge!(
        format!("{}_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Number of messages received in the last poll"
    );

    // OAI metrics
    describe_counter!(
        format!("{}_oai_sync_total", METRICS_PREFIX),
        Unit::Count,
        "Record OAI synchronisations by outcome"
    );

    describe_counter!(
        format!("{}_periodic_jobs_total", METRICS_PREFIX),
        Unit::Count,
        "Periodic worker jobs by name and outcome"
    );

    // Inbox metrics
    describe_counter!(
        format!("{}_inbox_notifications_total", METRICS_PREFIX),
        Unit::Count,
        "COAR notifications received by outcome"
    );

    // File audit metrics
    describe_counter!(
        format!("{}_file_checks_total", METRICS_PREFIX),
        Unit::Count,
        "File checksum verifications by outcome"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record publication metrics
pub fn record_publication(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_publications_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_publish_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record PID operations
pub fn record_pid_operation(action: &str, pid_type: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_pid_operations_total", METRICS_PREFIX),
        "action" => action.to_string(),
        "pid_type" => pid_type.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Helper to record task outcomes
pub fn record_task(name: &str, success: bool, attempts: u32) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_tasks_total", METRICS_PREFIX),
        "task" => name.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_task_attempts", METRICS_PREFIX),
        "task" => name.to_string()
    )
    .record(attempts as f64);
}

/// Helper to record periodic job runs
pub fn record_periodic_job(name: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_periodic_jobs_total", METRICS_PREFIX),
        "job" => name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Helper to record queue polls
pub fn record_queue_depth(received: usize) {
    gauge!(format!("{}_queue_depth", METRICS_PREFIX)).set(received as f64);
}

/// Helper to record OAI synchronisation
pub fn record_oai_sync(changed: bool) {
    let outcome = if changed { "updated" } else { "unchanged" };

    counter!(
        format!("{}_oai_sync_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Helper to record inbox notifications
pub fn record_notification(outcome: &str) {
    counter!(
        format!("{}_inbox_notifications_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record file checks; `None` is an inconclusive check
pub fn record_file_check(result: Option<bool>) {
    let outcome = match result {
        Some(true) => "ok",
        Some(false) => "mismatch",
        None => "inconclusive",
    };

    counter!(
        format!("{}_file_checks_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache_access(hit: bool) {
    if hit {
        counter!(format!("{}_cache_hits_total", METRICS_PREFIX)).increment(1);
    } else {
        counter!(format!("{}_cache_misses_total", METRICS_PREFIX)).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted() {
        for buckets in [LATENCY_BUCKETS, PUBLISH_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls must be no-ops
        record_publication(0.1, "published");
        record_pid_operation("register", "doi", true);
        record_task("register_doi", false, 6);
        record_file_check(None);
        record_cache_access(true);
    }
}
