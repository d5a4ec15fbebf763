//! Shared health counters for the /health endpoint.
//! Updated by the recalculation and override handlers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    recalculations_ok: AtomicU64,
    recalculations_failed: AtomicU64,
    override_writes: AtomicU64,
    /// Nanosecond timestamp of the last successful recalculation (0 = none).
    last_recalculated_at_ns: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub recalculations_ok: u64,
    pub recalculations_failed: u64,
    pub override_writes: u64,
    pub last_recalculated_at_ns: u64,
    pub cached_dashboards: usize,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_recalculation(&self, ok: bool, at_ns: i64) {
        if ok {
            self.recalculations_ok.fetch_add(1, Ordering::Relaxed);
            self.last_recalculated_at_ns.store(at_ns.max(0) as u64, Ordering::Relaxed);
        } else {
            self.recalculations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_override_write(&self) {
        self.override_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, cached_dashboards: usize) -> HealthReport {
        let failed = self.recalculations_failed.load(Ordering::Relaxed);
        let ok = self.recalculations_ok.load(Ordering::Relaxed);
        HealthReport {
            status: if failed > 0 && ok == 0 { "degraded" } else { "ok" },
            recalculations_ok: ok,
            recalculations_failed: failed,
            override_writes: self.override_writes.load(Ordering::Relaxed),
            last_recalculated_at_ns: self.last_recalculated_at_ns.load(Ordering::Relaxed),
            cached_dashboards,
        }
    }
}
