use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Why a record contributed nothing to the output. Records are never allowed
/// to fail the job; every discarded one lands in exactly one of these tallies.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    #[error("malformed record")]
    Malformed,
    #[error("pickup outside the configured date window")]
    OutOfWindow,
    #[error("no route between pickup and dropoff")]
    NoRoute,
    #[error("resolved route has zero ideal time")]
    DegenerateRoute,
}

/// Aggregate record outcomes for the map stage, shared across all map tasks.
#[derive(Default, Debug)]
pub struct MapCounters {
    records_seen: AtomicU64,
    header_rows: AtomicU64,
    trips_emitted: AtomicU64,
    pairs_emitted: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_out_of_window: AtomicU64,
    dropped_no_route: AtomicU64,
    dropped_degenerate_route: AtomicU64,
}

impl MapCounters {
    pub fn record_seen(&self) {
        self.records_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_header(&self) {
        self.header_rows.fetch_add(1, Ordering::Relaxed);
    }

    /// One trip that emitted `pairs` (key, ratio) records.
    pub fn record_trip(&self, pairs: u64) {
        self.trips_emitted.fetch_add(1, Ordering::Relaxed);
        self.pairs_emitted.fetch_add(pairs, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Malformed => &self.dropped_malformed,
            DropReason::OutOfWindow => &self.dropped_out_of_window,
            DropReason::NoRoute => &self.dropped_no_route,
            DropReason::DegenerateRoute => &self.dropped_degenerate_route,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            records_seen: self.records_seen.load(Ordering::Relaxed),
            header_rows: self.header_rows.load(Ordering::Relaxed),
            trips_emitted: self.trips_emitted.load(Ordering::Relaxed),
            pairs_emitted: self.pairs_emitted.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_out_of_window: self.dropped_out_of_window.load(Ordering::Relaxed),
            dropped_no_route: self.dropped_no_route.load(Ordering::Relaxed),
            dropped_degenerate_route: self.dropped_degenerate_route.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub records_seen: u64,
    pub header_rows: u64,
    pub trips_emitted: u64,
    pub pairs_emitted: u64,
    pub dropped_malformed: u64,
    pub dropped_out_of_window: u64,
    pub dropped_no_route: u64,
    pub dropped_degenerate_route: u64,
}

impl CountersSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_malformed
            + self.dropped_out_of_window
            + self.dropped_no_route
            + self.dropped_degenerate_route
    }
}
