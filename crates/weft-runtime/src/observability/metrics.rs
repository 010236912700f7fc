//! Metrics collection for runtime observability.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic counters covering the task, event, region, and stealing paths.
///
/// All counters are updated with relaxed ordering; they are heuristics and
/// diagnostics, never correctness inputs.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    /// Task instances created.
    pub tasks_created: AtomicUsize,

    /// Instances whose pending count reached zero and were enqueued.
    pub tasks_ready: AtomicUsize,

    /// Instances executed to completion.
    pub tasks_executed: AtomicUsize,

    /// Instances whose function returned an error.
    pub tasks_failed: AtomicUsize,

    /// Instances handed back to the scheduler after a region-mode
    /// conflict.
    pub tasks_requeued: AtomicUsize,

    /// Instances currently running on a worker.
    pub tasks_in_flight: AtomicUsize,

    /// Event satisfy calls that took effect.
    pub events_satisfied: AtomicUsize,

    /// Steal attempts against peers or the shared container.
    pub steals_attempted: AtomicUsize,

    /// Steal attempts that returned work.
    pub steals_succeeded: AtomicUsize,

    /// Regions allocated over the runtime's lifetime.
    pub regions_allocated: AtomicUsize,

    /// Region bytes currently allocated.
    pub region_bytes_in_use: AtomicUsize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_ready(&self) {
        self.tasks_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_start(&self) {
        self.tasks_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_completion(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        self.tasks_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_task_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.tasks_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_task_requeued(&self) {
        self.tasks_requeued.fetch_add(1, Ordering::Relaxed);
        self.tasks_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_event_satisfied(&self) {
        self.events_satisfied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_steal_attempt(&self) {
        self.steals_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_steal_success(&self) {
        self.steals_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_region_allocated(&self, bytes: usize) {
        self.regions_allocated.fetch_add(1, Ordering::Relaxed);
        self.region_bytes_in_use.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_region_destroyed(&self, bytes: usize) {
        self.region_bytes_in_use.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn executed(&self) -> usize {
        self.tasks_executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.tasks_in_flight.load(Ordering::Relaxed)
    }
}
