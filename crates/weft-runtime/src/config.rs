//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::sched::SchedulerConfig;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of OS worker threads.
    ///
    /// Default: number of logical CPUs.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Byte budget for region allocation; 0 means unlimited. Stands in
    /// for the bulk-allocator collaborator's capacity.
    ///
    /// Default: 0 (unlimited)
    #[serde(default)]
    pub region_budget_bytes: usize,

    /// Install a `tracing` subscriber at startup (ignored if one is
    /// already installed).
    ///
    /// Default: true
    #[serde(default = "default_enable_tracing")]
    pub enable_tracing: bool,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            region_budget_bytes: 0,
            enable_tracing: default_enable_tracing(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Quiet single-worker configuration, handy for tests and the
    /// sequential bridge.
    pub fn minimal() -> Self {
        Self {
            workers: 1,
            enable_tracing: false,
            ..Self::default()
        }
    }

    /// Set the worker-thread count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the region byte budget (0 = unlimited).
    pub fn with_region_budget(mut self, bytes: usize) -> Self {
        self.region_budget_bytes = bytes;
        self
    }

    /// Enable or disable tracing-subscriber installation.
    pub fn with_tracing(mut self, enable: bool) -> Self {
        self.enable_tracing = enable;
        self
    }

    /// Set the scheduler configuration.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        self.scheduler.validate()
    }
}

// Default functions for serde
fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_enable_tracing() -> bool {
    true
}
