//! Scheduler configuration.
//!
//! Selects the ready-work container, the victim-selection order, the
//! stealing policy, the push policy, and the worker idle-backoff shape.

use serde::{Deserialize, Serialize};

/// Which container holds ready instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyContainer {
    /// Per-worker work-stealing deques (LIFO owner end).
    Deque,
    /// Per-worker priority heaps, best-priority first.
    PriorityHeap,
}

/// Order in which an idle worker visits steal victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictimPolicy {
    /// Round-robin over all other workers, starting after the thief.
    Cyclic,
    /// A randomly chosen starting victim, then cyclic.
    Random,
    /// Visit cluster neighbors before remote workers.
    Hierarchical {
        /// Workers per locality cluster.
        cluster_size: usize,
    },
}

/// What a successful steal removes from the victim's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealPolicy {
    /// One item: the deque head, or the heap's worst entry.
    One,
    /// The worse half of a priority heap, re-homed to the thief.
    Half,
    /// The heap entry most local to the thief.
    Selfish,
    /// The heap entry farthest from the victim.
    Altruistic,
}

/// Where `give` places a newly ready instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushPolicy {
    /// Always the originating worker's container.
    Local,
    /// Route by the instance's locality hint when it has one.
    LocalityHint,
}

/// Configuration for the work-stealing scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ready-work container kind.
    ///
    /// Default: per-worker deques.
    #[serde(default = "default_ready_container")]
    pub ready_container: ReadyContainer,

    /// Victim-selection order for stealing.
    ///
    /// Default: cyclic.
    #[serde(default = "default_victim_policy")]
    pub victim_policy: VictimPolicy,

    /// Stealing policy. Policies other than `One` require the priority
    /// heap container.
    ///
    /// Default: one.
    #[serde(default = "default_steal_policy")]
    pub steal_policy: StealPolicy,

    /// Push policy for newly ready work.
    ///
    /// Default: local.
    #[serde(default = "default_push_policy")]
    pub push_policy: PushPolicy,

    /// Fixed capacity for priority heaps; 0 means unbounded. Exceeding a
    /// fixed capacity aborts: ready work is never dropped.
    ///
    /// Default: 0.
    #[serde(default)]
    pub heap_capacity: usize,

    /// Spin iterations before an idle worker starts yielding.
    ///
    /// Default: 64
    #[serde(default = "default_spin_before_yield")]
    pub spin_before_yield: u32,

    /// Yield iterations before an idle worker parks.
    ///
    /// Default: 8
    #[serde(default = "default_yields_before_park")]
    pub yields_before_park: u32,

    /// Upper bound on one parked wait; parked workers are also woken by
    /// `give`.
    ///
    /// Default: 10ms
    #[serde(default = "default_park_timeout_ms")]
    pub park_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ready_container: default_ready_container(),
            victim_policy: default_victim_policy(),
            steal_policy: default_steal_policy(),
            push_policy: default_push_policy(),
            heap_capacity: 0,
            spin_before_yield: default_spin_before_yield(),
            yields_before_park: default_yields_before_park(),
            park_timeout_ms: default_park_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ready-work container.
    pub fn with_ready_container(mut self, container: ReadyContainer) -> Self {
        self.ready_container = container;
        self
    }

    /// Set the victim-selection policy.
    pub fn with_victim_policy(mut self, policy: VictimPolicy) -> Self {
        self.victim_policy = policy;
        self
    }

    /// Set the stealing policy.
    pub fn with_steal_policy(mut self, policy: StealPolicy) -> Self {
        self.steal_policy = policy;
        self
    }

    /// Set the push policy.
    pub fn with_push_policy(mut self, policy: PushPolicy) -> Self {
        self.push_policy = policy;
        self
    }

    /// Set the fixed heap capacity (0 = unbounded).
    pub fn with_heap_capacity(mut self, capacity: usize) -> Self {
        self.heap_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let VictimPolicy::Hierarchical { cluster_size } = self.victim_policy {
            if cluster_size == 0 {
                return Err("hierarchical cluster_size must be > 0".to_string());
            }
        }
        if self.steal_policy != StealPolicy::One
            && self.ready_container != ReadyContainer::PriorityHeap
        {
            return Err(format!(
                "steal policy {:?} requires the priority_heap container",
                self.steal_policy
            ));
        }
        if self.park_timeout_ms == 0 {
            return Err("park_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

// Default functions for serde
fn default_ready_container() -> ReadyContainer {
    ReadyContainer::Deque
}

fn default_victim_policy() -> VictimPolicy {
    VictimPolicy::Cyclic
}

fn default_steal_policy() -> StealPolicy {
    StealPolicy::One
}

fn default_push_policy() -> PushPolicy {
    PushPolicy::Local
}

fn default_spin_before_yield() -> u32 {
    64
}

fn default_yields_before_park() -> u32 {
    8
}

fn default_park_timeout_ms() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert_eq!(config.ready_container, ReadyContainer::Deque);
        assert_eq!(config.steal_policy, StealPolicy::One);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn heap_policies_require_heap_container() {
        let config = SchedulerConfig::new().with_steal_policy(StealPolicy::Half);
        assert!(config.validate().is_err());

        let config = config.with_ready_container(ReadyContainer::PriorityHeap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hierarchical_needs_nonzero_cluster() {
        let config = SchedulerConfig::new()
            .with_victim_policy(VictimPolicy::Hierarchical { cluster_size: 0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let config = SchedulerConfig::new()
            .with_ready_container(ReadyContainer::PriorityHeap)
            .with_steal_policy(StealPolicy::Selfish)
            .with_heap_capacity(4096);
        let json = serde_json::to_string(&config).expect("serialize");
        let restored: SchedulerConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.ready_container, ReadyContainer::PriorityHeap);
        assert_eq!(restored.steal_policy, StealPolicy::Selfish);
        assert_eq!(restored.heap_capacity, 4096);
    }

    #[test]
    fn serde_defaults_fill_missing_fields() {
        let config: SchedulerConfig = serde_json::from_str("{}").expect("deserialize empty");
        assert_eq!(config.ready_container, ReadyContainer::Deque);
        assert_eq!(config.park_timeout_ms, 10);
    }
}
