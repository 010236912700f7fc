//! Work-stealing dispatch.
//!
//! Each worker owns a ready-work container (a LIFO deque or a priority
//! heap, per configuration) plus an injector inbox that other threads
//! `give` into. `take` tries the worker's own work first, then its inbox,
//! then iterates victims in the configured order and steals. An exhausted
//! search returns `None` — the caller decides whether to spin, yield, or
//! park.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_deque::{Injector, Steal};
use rand::Rng;

use weft_core::Handle;

use crate::observability::MetricsCollector;

use super::config::{PushPolicy, ReadyContainer, SchedulerConfig, StealPolicy, VictimPolicy};
use super::deque::{work_stealing_deque, TaskDeque, TaskStealer};
use super::heap::PriorityHeap;
use super::object::ItemProps;

/// Placement collaborator consulted by `give`. The core treats the answer
/// purely as a hint.
pub trait PlacementOracle: Send + Sync {
    /// Preferred worker for `instance`, or `None` for no preference.
    fn preferred_worker(
        &self,
        instance: Handle,
        props: &ItemProps,
        workers: usize,
    ) -> Option<usize>;
}

/// Work-stealing coordinator.
///
/// Holds the shared endpoints of every worker's containers; the owner
/// deque endpoints are returned from [`WorkStealer::new`] and move onto
/// their worker threads.
pub struct WorkStealer {
    inboxes: Vec<Injector<Handle>>,
    /// Thief endpoints; empty when the heap container is configured.
    stealers: Vec<TaskStealer>,
    /// Per-worker heaps; empty when the deque container is configured.
    heaps: Vec<Arc<PriorityHeap>>,
    victim_policy: VictimPolicy,
    steal_policy: StealPolicy,
    push_policy: PushPolicy,
    placement: Option<Arc<dyn PlacementOracle>>,
    metrics: Arc<MetricsCollector>,
    /// Last runlevel propagated down from the runtime (diagnostic).
    runlevel: AtomicU8,
}

impl WorkStealer {
    /// Builds the coordinator and one owner deque endpoint per worker
    /// (empty in heap mode).
    pub fn new(
        workers: usize,
        config: &SchedulerConfig,
        metrics: Arc<MetricsCollector>,
        placement: Option<Arc<dyn PlacementOracle>>,
    ) -> (Self, Vec<TaskDeque>) {
        let workers = workers.max(1);
        let inboxes = (0..workers).map(|_| Injector::new()).collect();

        let mut owner_deques = Vec::new();
        let mut stealers = Vec::new();
        let mut heaps = Vec::new();
        match config.ready_container {
            ReadyContainer::Deque => {
                for _ in 0..workers {
                    let (deque, stealer) = work_stealing_deque();
                    owner_deques.push(deque);
                    stealers.push(stealer);
                }
            }
            ReadyContainer::PriorityHeap => {
                for _ in 0..workers {
                    heaps.push(Arc::new(PriorityHeap::new(config.heap_capacity)));
                }
            }
        }

        let scheduler = WorkStealer {
            inboxes,
            stealers,
            heaps,
            victim_policy: config.victim_policy,
            steal_policy: config.steal_policy,
            push_policy: config.push_policy,
            placement,
            metrics,
            runlevel: AtomicU8::new(0),
        };
        (scheduler, owner_deques)
    }

    /// Number of worker slots.
    pub fn num_workers(&self) -> usize {
        self.inboxes.len()
    }

    /// Records a runlevel transition propagated from the runtime. The
    /// containers are stateless across runlevels; workers read the
    /// runtime's level directly.
    pub fn switch_runlevel(&self, level: u8) {
        self.runlevel.store(level, Ordering::Release);
        tracing::debug!(level, "scheduler runlevel switched");
    }

    /// Inserts a newly ready instance into the container chosen by the
    /// push policy (and the placement oracle, when one is installed).
    pub fn give(&self, worker_id: usize, item: Handle, props: &ItemProps) {
        let workers = self.num_workers();
        let mut target = worker_id % workers;
        if let PushPolicy::LocalityHint = self.push_policy {
            if let Some(locality) = props.locality {
                target = (locality % workers as u64) as usize;
            }
        }
        if let Some(oracle) = &self.placement {
            if let Some(preferred) = oracle.preferred_worker(item, props, workers) {
                target = preferred % workers;
            }
        }

        if self.heaps.is_empty() {
            self.inboxes[target].push(item);
        } else {
            self.heaps[target].push(item, props);
        }
    }

    /// Takes one ready instance for `worker_id`. `local` is the worker's
    /// own deque endpoint; bridge callers outside any worker thread pass
    /// `None` and are served from inboxes and steal endpoints only.
    pub fn take(&self, worker_id: usize, local: Option<&TaskDeque>) -> Option<Handle> {
        let worker_id = worker_id % self.num_workers();

        // Own work first: deque tail or heap best.
        if let Some(local) = local {
            if let Some(item) = local.pop() {
                return Some(item);
            }
        }
        if let Some(heap) = self.heaps.get(worker_id) {
            if let Some(item) = heap.pop_best() {
                return Some(item);
            }
        }

        // Own inbox next.
        if let Some(item) = steal_injector(&self.inboxes[worker_id]) {
            return Some(item);
        }

        // Then the victims.
        for victim in self.victim_order(worker_id) {
            self.metrics.record_steal_attempt();
            if let Some(item) = self.steal_from(victim, worker_id) {
                self.metrics.record_steal_success();
                return Some(item);
            }
        }
        None
    }

    /// Best-effort emptiness check across all containers. Racy by
    /// nature; used only for drain heuristics.
    pub fn is_empty(&self) -> bool {
        self.inboxes.iter().all(|inbox| inbox.is_empty())
            && self.stealers.iter().all(TaskStealer::is_empty)
            && self.heaps.iter().all(|heap| heap.is_empty())
    }

    /// Approximate total ready work across all containers.
    pub fn total_work(&self) -> usize {
        let inbox: usize = self.inboxes.iter().map(Injector::len).sum();
        let stolen: usize = self.stealers.iter().map(TaskStealer::len).sum();
        let heaped: usize = self.heaps.iter().map(|heap| heap.len()).sum();
        inbox + stolen + heaped
    }

    fn victim_order(&self, worker_id: usize) -> Vec<usize> {
        let workers = self.num_workers();
        if workers <= 1 {
            return Vec::new();
        }
        match self.victim_policy {
            VictimPolicy::Cyclic => (1..workers).map(|i| (worker_id + i) % workers).collect(),
            VictimPolicy::Random => {
                let start = rand::thread_rng().gen_range(0..workers);
                (0..workers)
                    .map(|i| (start + i) % workers)
                    .filter(|&v| v != worker_id)
                    .collect()
            }
            VictimPolicy::Hierarchical { cluster_size } => {
                let cluster = worker_id / cluster_size;
                let mut order: Vec<usize> =
                    (1..workers).map(|i| (worker_id + i) % workers).collect();
                // Cluster neighbors first, preserving cyclic order inside
                // each group.
                order.sort_by_key(|&v| usize::from(v / cluster_size != cluster));
                order
            }
        }
    }

    fn steal_from(&self, victim: usize, thief: usize) -> Option<Handle> {
        if let Some(stealer) = self.stealers.get(victim) {
            if let Some(item) = stealer.steal() {
                return Some(item);
            }
        }
        if let Some(heap) = self.heaps.get(victim) {
            if let Some(item) = self.steal_from_heap(heap, victim, thief) {
                return Some(item);
            }
        }
        steal_injector(&self.inboxes[victim])
    }

    fn steal_from_heap(
        &self,
        heap: &Arc<PriorityHeap>,
        victim: usize,
        thief: usize,
    ) -> Option<Handle> {
        match self.steal_policy {
            StealPolicy::One => heap.pop_worst(),
            StealPolicy::Half => heap.steal_half_into(&self.heaps[thief]),
            StealPolicy::Selfish => heap.pop_selfish(thief as u64),
            StealPolicy::Altruistic => heap.pop_altruistic(victim as u64),
        }
    }
}

fn steal_injector(injector: &Injector<Handle>) -> Option<Handle> {
    match injector.steal() {
        Steal::Success(item) => Some(item),
        Steal::Empty => None,
        Steal::Retry => match injector.steal() {
            Steal::Success(item) => Some(item),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::arena::SlotId;
    use weft_core::ObjectKind;

    fn item(index: u32) -> Handle {
        Handle::new(ObjectKind::Task, SlotId::new(index, 0))
    }

    fn scheduler(workers: usize, config: SchedulerConfig) -> (WorkStealer, Vec<TaskDeque>) {
        WorkStealer::new(
            workers,
            &config,
            Arc::new(MetricsCollector::new()),
            None,
        )
    }

    #[test]
    fn give_then_take_round_trips() {
        let (ws, _deques) = scheduler(2, SchedulerConfig::default());
        ws.give(0, item(1), &ItemProps::default());
        assert_eq!(ws.take(0, None), Some(item(1)));
        assert_eq!(ws.take(0, None), None);
    }

    #[test]
    fn idle_worker_steals_from_peer_inbox() {
        let (ws, _deques) = scheduler(3, SchedulerConfig::default());
        ws.give(1, item(5), &ItemProps::default());
        // Worker 0 has nothing local; it must find worker 1's item.
        assert_eq!(ws.take(0, None), Some(item(5)));
    }

    #[test]
    fn thief_drains_owner_deque() {
        let (ws, deques) = scheduler(2, SchedulerConfig::default());
        deques[1].push(item(9));
        assert_eq!(ws.take(0, Some(&deques[0])), Some(item(9)));
    }

    #[test]
    fn locality_hint_routes_push() {
        let config = SchedulerConfig::new().with_push_policy(PushPolicy::LocalityHint);
        let (ws, _deques) = scheduler(4, config);
        let props = ItemProps {
            priority: 0,
            locality: Some(2),
        };
        ws.give(0, item(3), &props);
        // The item landed in worker 2's inbox; a take for worker 2 finds
        // it without stealing.
        assert_eq!(ws.take(2, None), Some(item(3)));
    }

    #[test]
    fn placement_oracle_overrides_target() {
        struct PinTo(usize);
        impl PlacementOracle for PinTo {
            fn preferred_worker(&self, _: Handle, _: &ItemProps, _: usize) -> Option<usize> {
                Some(self.0)
            }
        }

        let (ws, _deques) = WorkStealer::new(
            4,
            &SchedulerConfig::default(),
            Arc::new(MetricsCollector::new()),
            Some(Arc::new(PinTo(3))),
        );
        ws.give(0, item(8), &ItemProps::default());
        assert_eq!(ws.take(3, None), Some(item(8)));
    }

    #[test]
    fn heap_mode_pops_best_locally_and_steals_worst() {
        let config = SchedulerConfig::new()
            .with_ready_container(ReadyContainer::PriorityHeap);
        let (ws, _deques) = scheduler(2, config);

        ws.give(0, item(1), &ItemProps { priority: 10, locality: None });
        ws.give(0, item(2), &ItemProps { priority: 1, locality: None });
        ws.give(0, item(3), &ItemProps { priority: 5, locality: None });

        // Owner gets the best...
        assert_eq!(ws.take(0, None), Some(item(2)));
        // ...a thief takes the worst.
        assert_eq!(ws.take(1, None), Some(item(1)));
    }

    #[test]
    fn steal_half_rehomes_the_batch() {
        let config = SchedulerConfig::new()
            .with_ready_container(ReadyContainer::PriorityHeap)
            .with_steal_policy(StealPolicy::Half);
        let (ws, _deques) = scheduler(2, config);

        for cost in 1..=6 {
            ws.give(0, item(cost as u32), &ItemProps { priority: cost, locality: None });
        }

        // The thief's take returns one stolen item and moves the rest of
        // the batch into its own heap.
        let first = ws.take(1, None).expect("stolen item");
        assert_eq!(first, item(6));
        assert_eq!(ws.heaps[1].len(), 2);
        assert_eq!(ws.heaps[0].len(), 3);
    }

    #[test]
    fn victim_order_cyclic_starts_after_thief() {
        let (ws, _deques) = scheduler(4, SchedulerConfig::default());
        assert_eq!(ws.victim_order(1), vec![2, 3, 0]);
    }

    #[test]
    fn victim_order_hierarchical_prefers_cluster() {
        let config = SchedulerConfig::new()
            .with_victim_policy(VictimPolicy::Hierarchical { cluster_size: 2 });
        let (ws, _deques) = scheduler(6, config);
        let order = ws.victim_order(0);
        // Worker 1 shares worker 0's cluster and is visited first.
        assert_eq!(order[0], 1);
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn concurrent_takes_never_duplicate() {
        let (ws, _deques) = scheduler(4, SchedulerConfig::default());
        let total = 256;
        for i in 0..total {
            ws.give((i % 4) as usize, item(i), &ItemProps::default());
        }

        let ws = Arc::new(ws);
        let mut all = Vec::new();
        std::thread::scope(|scope| {
            let joins: Vec<_> = (0..4)
                .map(|worker| {
                    let ws = Arc::clone(&ws);
                    scope.spawn(move || {
                        let mut taken = Vec::new();
                        let mut misses = 0;
                        // A miss is not proof of emptiness (conflicted
                        // steals), so tolerate a streak before giving up.
                        while misses < 100 {
                            match ws.take(worker, None) {
                                Some(item) => {
                                    taken.push(item);
                                    misses = 0;
                                }
                                None => {
                                    misses += 1;
                                    std::thread::yield_now();
                                }
                            }
                        }
                        taken
                    })
                })
                .collect();
            for join in joins {
                all.extend(join.join().unwrap());
            }
        });

        let unique: std::collections::HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len() as u32, total);
        assert_eq!(unique.len() as u32, total);
    }
}
