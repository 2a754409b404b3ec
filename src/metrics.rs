//! Lightweight in-memory connection metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct ConnectionMetrics {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    evictions: AtomicU64,
    wait_timeouts: AtomicU64,
    connect_duration_total_ms: AtomicU64,
    connect_duration_max_ms: AtomicU64,
}

static CONNECTION_METRICS: OnceLock<ConnectionMetrics> = OnceLock::new();

fn metrics() -> &'static ConnectionMetrics {
    CONNECTION_METRICS.get_or_init(ConnectionMetrics::default)
}

/// Records one physical open attempt (initial or reconnect).
pub fn record_connect(duration_ms: f64, success: bool) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.connect_attempts.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.connect_failures.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .connect_duration_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .connect_duration_max_ms
        .fetch_max(duration_ms, Ordering::Relaxed);
}

pub fn record_reconnect_attempt() {
    metrics().reconnect_attempts.fetch_add(1, Ordering::Relaxed);
}

pub fn record_eviction() {
    metrics().evictions.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wait_timeout() {
    metrics().wait_timeouts.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetricsSnapshot {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub reconnect_attempts: u64,
    pub evictions: u64,
    pub wait_timeouts: u64,
    pub avg_connect_ms: Option<f64>,
    pub max_connect_ms: Option<u64>,
}

pub fn snapshot() -> ConnectionMetricsSnapshot {
    let metrics = metrics();
    let attempts = metrics.connect_attempts.load(Ordering::Relaxed);
    let duration_total = metrics.connect_duration_total_ms.load(Ordering::Relaxed);
    let max_ms = metrics.connect_duration_max_ms.load(Ordering::Relaxed);

    ConnectionMetricsSnapshot {
        connect_attempts: attempts,
        connect_failures: metrics.connect_failures.load(Ordering::Relaxed),
        reconnect_attempts: metrics.reconnect_attempts.load(Ordering::Relaxed),
        evictions: metrics.evictions.load(Ordering::Relaxed),
        wait_timeouts: metrics.wait_timeouts.load(Ordering::Relaxed),
        avg_connect_ms: (attempts > 0).then(|| duration_total as f64 / attempts as f64),
        max_connect_ms: (max_ms > 0).then_some(max_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_flow() {
        // Other tests record concurrently; assert on deltas only.
        let initial = snapshot();

        record_connect(40.0, true);
        record_connect(15.0, false);
        let s1 = snapshot();
        assert!(s1.connect_attempts >= initial.connect_attempts + 2);
        assert!(s1.connect_failures > initial.connect_failures);

        record_reconnect_attempt();
        record_eviction();
        record_wait_timeout();
        let s2 = snapshot();
        assert!(s2.reconnect_attempts > initial.reconnect_attempts);
        assert!(s2.evictions > initial.evictions);
        assert!(s2.wait_timeouts > initial.wait_timeouts);

        record_connect(99_999.0, true);
        assert!(snapshot().max_connect_ms.unwrap() >= 99_999);
    }
}
