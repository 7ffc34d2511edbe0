//! Renewal statistics.
//!
//! [`Counter`] is a relaxed atomic monotonic counter, [`Gauge`] a relaxed
//! atomic level. Both serialize as plain integers so a [`RenewalMetrics`]
//! snapshot is directly printable as JSON.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// A monotonically increasing counter.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

/// A level that moves both ways (e.g. number of live paths).
#[derive(Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gauge").field(&self.get()).finish()
    }
}

impl Serialize for Gauge {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

/// Counters shared by the coordinator, the worker and the wheel.
#[derive(Debug, Default, Serialize)]
pub struct RenewalMetrics {
    /// Paths successfully provisioned.
    pub provisioned: Counter,
    /// Provisioning attempts that failed.
    pub provision_failures: Counter,
    /// Successful periodic or manual renewals.
    pub renewals: Counter,
    /// Renewal passes that failed and left the path stalled.
    pub renewal_failures: Counter,
    /// Renewal requests for paths that no longer had state.
    pub renewals_skipped: Counter,
    /// Remote configuration writes that succeeded.
    pub pushes: Counter,
    /// Remote configuration writes that failed (including unresolved hops).
    pub push_failures: Counter,
    /// Remote configuration deletes issued on teardown.
    pub deletes: Counter,
    /// Remote configuration deletes that failed.
    pub delete_failures: Counter,
    /// Renewal timers that fired.
    pub timers_fired: Counter,
    /// Paths with live renewal state.
    pub active_paths: Gauge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_counts() {
        let c = Counter::default();
        assert_eq!(c.get(), 0);
        c.inc();
        c.inc_by(10);
        assert_eq!(c.get(), 11);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let g = Gauge::default();
        g.inc();
        g.inc();
        g.dec();
        assert_eq!(g.get(), 1);
        g.set(-3);
        assert_eq!(g.get(), -3);
    }

    #[test]
    fn metrics_snapshot_is_flat_json() {
        let m = RenewalMetrics::default();
        m.pushes.inc_by(7);
        m.active_paths.inc();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["pushes"], 7);
        assert_eq!(json["active_paths"], 1);
        assert_eq!(json["renewals"], 0);
    }
}
