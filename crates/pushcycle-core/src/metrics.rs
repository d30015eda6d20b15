//! Process-wide cycle counters.
//!
//! Incremented by the orchestrator; [`Metrics::flush`] emits them as one
//! `info!` event, which the CLI does before exiting.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    remote_branches_deleted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            cycles_started: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            remote_branches_deleted: AtomicU64::new(0),
        }
    }

    pub fn inc_cycles_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_started", "counter incremented");
    }

    pub fn inc_cycles_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_completed", "counter incremented");
    }

    pub fn inc_cycles_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_failed", "counter incremented");
    }

    /// Counts actual deletions only, not already-absent branches.
    pub fn inc_remote_branches_deleted(&self) {
        self.remote_branches_deleted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "remote_branches_deleted", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            cycles_started = self.cycles_started(),
            cycles_completed = self.cycles_completed(),
            cycles_failed = self.cycles_failed(),
            remote_branches_deleted = self.remote_branches_deleted(),
        );
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn remote_branches_deleted(&self) -> u64 {
        self.remote_branches_deleted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_cycle_outcomes() {
        let m = Metrics::new();
        m.inc_cycles_started();
        m.inc_cycles_started();
        m.inc_cycles_completed();
        m.inc_cycles_failed();
        m.inc_remote_branches_deleted();

        assert_eq!(m.cycles_started(), 2);
        assert_eq!(m.cycles_completed(), 1);
        assert_eq!(m.cycles_failed(), 1);
        assert_eq!(m.remote_branches_deleted(), 1);
    }
}
