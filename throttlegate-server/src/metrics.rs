//! Lightweight metrics for the governance layer
//!
//! Plain atomic counters, no allocation on the hot path. Exported in the
//! Prometheus text format by [`Metrics::export_prometheus`].

use crate::error::{GovernanceError, LimitScope};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

pub struct Metrics {
    start_time: Instant,

    /// Admission decisions
    pub requests_total: AtomicU64,
    pub requests_admitted: AtomicU64,
    pub denied_sustained: AtomicU64,
    pub denied_burst: AtomicU64,

    /// Cache and de-duplication
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub dedup_joins: AtomicU64,

    /// Downstream protection
    pub breaker_rejections: AtomicU64,
    pub queue_timeouts: AtomicU64,
    pub queue_rejections: AtomicU64,
    pub upstream_errors: AtomicU64,
    pub internal_errors: AtomicU64,
    pub fallbacks_served: AtomicU64,

    /// Request latency buckets (in microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_under_10ms: AtomicU64,
    pub latency_under_100ms: AtomicU64,
    pub latency_under_1s: AtomicU64,
    pub latency_over_1s: AtomicU64,
    pub latency_sum_micros: AtomicU64,
    pub latency_count: AtomicU64,

    /// Identifiers tracked by the sliding window
    pub tracked_identifiers: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests_total: AtomicU64::new(0),
            requests_admitted: AtomicU64::new(0),
            denied_sustained: AtomicU64::new(0),
            denied_burst: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            dedup_joins: AtomicU64::new(0),
            breaker_rejections: AtomicU64::new(0),
            queue_timeouts: AtomicU64::new(0),
            queue_rejections: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
            fallbacks_served: AtomicU64::new(0),
            latency_under_1ms: AtomicU64::new(0),
            latency_under_10ms: AtomicU64::new(0),
            latency_under_100ms: AtomicU64::new(0),
            latency_under_1s: AtomicU64::new(0),
            latency_over_1s: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            tracked_identifiers: AtomicUsize::new(0),
        }
    }

    pub fn record_admitted(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failure by kind; rate-limit denials also count as requests
    pub fn record_error(&self, err: &GovernanceError) {
        let counter = match err {
            GovernanceError::RateLimited { scope, .. } => {
                self.requests_total.fetch_add(1, Ordering::Relaxed);
                match scope {
                    LimitScope::Sustained => &self.denied_sustained,
                    LimitScope::Burst => &self.denied_burst,
                }
            }
            GovernanceError::CircuitOpen { .. } => &self.breaker_rejections,
            GovernanceError::QueueTimeout { .. } => &self.queue_timeouts,
            GovernanceError::QueueClosed => &self.queue_rejections,
            GovernanceError::Upstream(_) => &self.upstream_errors,
            GovernanceError::Internal(_) => &self.internal_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_us: u64) {
        match latency_us {
            0..=999 => self.latency_under_1ms.fetch_add(1, Ordering::Relaxed),
            1000..=9999 => self.latency_under_10ms.fetch_add(1, Ordering::Relaxed),
            10000..=99999 => self.latency_under_100ms.fetch_add(1, Ordering::Relaxed),
            100000..=999999 => self.latency_under_1s.fetch_add(1, Ordering::Relaxed),
            _ => self.latency_over_1s.fetch_add(1, Ordering::Relaxed),
        };
        self.latency_sum_micros
            .fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_tracked_identifiers(&self, count: usize) {
        self.tracked_identifiers.store(count, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        gauge(
            &mut output,
            "throttlegate_uptime_seconds",
            "Time since server start in seconds",
            self.uptime_seconds(),
        );
        counter(
            &mut output,
            "throttlegate_requests_total",
            "Requests that reached admission control",
            self.requests_total.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_requests_admitted",
            "Requests admitted by both limiters",
            self.requests_admitted.load(Ordering::Relaxed),
        );

        let _ = writeln!(
            output,
            "# HELP throttlegate_requests_denied Requests refused by a rate limiter"
        );
        let _ = writeln!(output, "# TYPE throttlegate_requests_denied counter");
        let _ = writeln!(
            output,
            "throttlegate_requests_denied{{scope=\"sustained\"}} {}",
            self.denied_sustained.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            output,
            "throttlegate_requests_denied{{scope=\"burst\"}} {}\n",
            self.denied_burst.load(Ordering::Relaxed)
        );

        counter(
            &mut output,
            "throttlegate_cache_hits",
            "Requests answered from cache",
            self.cache_hits.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_cache_misses",
            "Cache lookups that missed",
            self.cache_misses.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_dedup_joins",
            "Requests that joined an identical in-flight call",
            self.dedup_joins.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_breaker_rejections",
            "Calls failed fast by the circuit breaker",
            self.breaker_rejections.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_queue_timeouts",
            "Tasks that did not complete within their queue timeout",
            self.queue_timeouts.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_queue_rejections",
            "Tasks rejected by a closed queue",
            self.queue_rejections.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_upstream_errors",
            "Downstream calls that failed",
            self.upstream_errors.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_internal_errors",
            "Failures inside the governance layer",
            self.internal_errors.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "throttlegate_fallbacks_served",
            "Failures answered with a caller-supplied fallback",
            self.fallbacks_served.load(Ordering::Relaxed),
        );

        // Latency distribution
        let under_1ms = self.latency_under_1ms.load(Ordering::Relaxed);
        let under_10ms = under_1ms + self.latency_under_10ms.load(Ordering::Relaxed);
        let under_100ms = under_10ms + self.latency_under_100ms.load(Ordering::Relaxed);
        let under_1s = under_100ms + self.latency_under_1s.load(Ordering::Relaxed);
        let count = self.latency_count.load(Ordering::Relaxed);

        let _ = writeln!(
            output,
            "# HELP throttlegate_request_duration Governed request latency distribution"
        );
        let _ = writeln!(output, "# TYPE throttlegate_request_duration histogram");
        for (le, value) in [
            ("0.001", under_1ms),
            ("0.01", under_10ms),
            ("0.1", under_100ms),
            ("1", under_1s),
            ("+Inf", count),
        ] {
            let _ = writeln!(
                output,
                "throttlegate_request_duration_bucket{{le=\"{le}\"}} {value}"
            );
        }
        let latency_sum_seconds =
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(
            output,
            "throttlegate_request_duration_sum {latency_sum_seconds:.6}"
        );
        let _ = writeln!(output, "throttlegate_request_duration_count {count}\n");

        gauge(
            &mut output,
            "throttlegate_tracked_identifiers",
            "Identifiers tracked by the sliding window limiter",
            self.tracked_identifiers.load(Ordering::Relaxed) as u64,
        );

        output
    }
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name} {value}\n");
}

fn gauge(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name} {value}\n");
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.requests_admitted.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.denied_sustained.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_error_by_kind() {
        let metrics = Metrics::new();

        metrics.record_admitted();
        metrics.record_error(&GovernanceError::RateLimited {
            scope: LimitScope::Burst,
            retry_after: Duration::from_millis(500),
        });
        metrics.record_error(&GovernanceError::CircuitOpen {
            breaker: "llm".into(),
            retry_after: Duration::from_secs(10),
        });
        metrics.record_error(&GovernanceError::upstream(anyhow::anyhow!("boom")));

        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.requests_admitted.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.denied_burst.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.denied_sustained.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.breaker_rejections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.upstream_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_latency_buckets() {
        let metrics = Metrics::new();

        metrics.record_latency(500); // < 1ms
        metrics.record_latency(5000); // < 10ms
        metrics.record_latency(50000); // < 100ms
        metrics.record_latency(500000); // < 1s
        metrics.record_latency(5000000); // > 1s

        assert_eq!(metrics.latency_under_1ms.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.latency_under_10ms.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.latency_under_100ms.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.latency_under_1s.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.latency_over_1s.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.latency_count.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.record_admitted();
        metrics.record_cache(true);
        metrics.record_cache(false);
        metrics.record_latency(2000);
        metrics.record_error(&GovernanceError::RateLimited {
            scope: LimitScope::Sustained,
            retry_after: Duration::from_secs(60),
        });
        metrics.update_tracked_identifiers(42);

        let output = metrics.export_prometheus();

        assert!(output.contains("# TYPE throttlegate_requests_total counter"));
        assert!(output.contains("throttlegate_requests_total 2"));
        assert!(output.contains("throttlegate_requests_denied{scope=\"sustained\"} 1"));
        assert!(output.contains("throttlegate_requests_denied{scope=\"burst\"} 0"));
        assert!(output.contains("throttlegate_cache_hits 1"));
        assert!(output.contains("throttlegate_cache_misses 1"));
        assert!(output.contains("throttlegate_request_duration_bucket{le=\"0.001\"} 0"));
        assert!(output.contains("throttlegate_request_duration_bucket{le=\"0.01\"} 1"));
        assert!(output.contains("throttlegate_request_duration_bucket{le=\"+Inf\"} 1"));
        assert!(output.contains("throttlegate_request_duration_count 1"));
        assert!(output.contains("throttlegate_tracked_identifiers 42"));
    }
}
