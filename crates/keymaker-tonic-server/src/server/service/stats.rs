//! Lock-free request counters for a single drone.
//!
//! These mirror the OpenTelemetry instruments in
//! [`telemetry`](crate::server::telemetry) but are always compiled in, so
//! callers (and tests) can inspect a drone without an exporter.

use portable_atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct DroneStats {
    requests: AtomicU64,
    keys_issued: AtomicU64,
    bad_requests: AtomicU64,
    failures: AtomicU64,
    rejected_connections: AtomicU64,
    open_connections: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// A point-in-time copy of [`DroneStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub keys_issued: u64,
    pub bad_requests: u64,
    pub failures: u64,
    pub rejected_connections: u64,
    /// Admitted connections not yet closed by either side.
    pub open_connections: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl DroneStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_issued(&self) {
        self.keys_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_connection(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an admitted connection as open until the guard is dropped.
    pub fn open_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.open_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            stats: Arc::clone(self),
        }
    }

    /// Marks a generation as started and returns a guard that marks it
    /// finished when dropped.
    pub fn start_generation(&self) -> GenerationGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        GenerationGuard { stats: self }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            keys_issued: self.keys_issued.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            open_connections: self.open_connections.load(Ordering::Acquire),
            in_flight: self.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
        }
    }
}

pub struct GenerationGuard<'a> {
    stats: &'a DroneStats,
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Held by an admitted connection for as long as it is open.
#[derive(Debug)]
pub struct ConnectionGuard {
    stats: Arc<DroneStats>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}
