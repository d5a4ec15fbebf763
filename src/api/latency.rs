//! Wall-clock timings of market recalculations, from the moment a handler
//! starts the work until the override is persisted and the dashboard cache
//! entry is gone. Failed recalculations are timed too.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Longest recalculation the histogram resolves (100 s, in microseconds).
const MAX_TRACKED_US: u64 = 100_000_000;

/// Percentile view served by `/stats/latency`, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

pub struct LatencyStats {
    histogram: Mutex<Histogram<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKED_US, 3)
            .expect("valid histogram bounds");
        Self { histogram: Mutex::new(histogram) }
    }

    /// Sub-microsecond runs count as 1 us; anything past the ceiling is
    /// clamped to it rather than dropped.
    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().clamp(1, u128::from(MAX_TRACKED_US)) as u64;
        if let Ok(mut h) = self.histogram.lock() {
            let _ = h.record(us);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.histogram.lock() else {
            return LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None };
        };
        let at = |q: f64| (h.len() > 0).then(|| h.value_at_quantile(q) as f64 / 1000.0);
        LatencySummary {
            samples: h.len(),
            p50_ms: at(0.50),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_recalculations_means_no_percentiles() {
        let summary = LatencyStats::new().summary();
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.p50_ms, None);
        assert_eq!(summary.p99_ms, None);
    }

    #[test]
    fn summary_reports_milliseconds() {
        let stats = LatencyStats::new();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        let summary = stats.summary();
        assert_eq!(summary.samples, 100);
        let p50 = summary.p50_ms.unwrap();
        assert!((49.0..=51.0).contains(&p50), "p50={p50}");
        assert!(summary.p95_ms.unwrap() >= p50);
        assert!(summary.p99_ms.unwrap() >= summary.p95_ms.unwrap());
    }

    #[test]
    fn out_of_range_durations_are_clamped() {
        let stats = LatencyStats::new();
        stats.record(Duration::from_nanos(10));
        stats.record(Duration::from_secs(3600));
        assert_eq!(stats.summary().samples, 2);
    }
}
