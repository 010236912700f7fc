//! Runtime facade.
//!
//! [`Runtime`] wires the registry, region manager, event subsystem, task
//! manager, and work-stealing scheduler together and exposes the
//! operation surface the surrounding layers call. It is a cheap clone
//! around shared state: worker threads hold their own clones.
//!
//! Bring-up and tear-down decisions belong to an external orchestrator;
//! the runtime only honors the runlevel contract: `start` spawns the
//! worker threads, `stop` signals and joins them, and `drain` blocks
//! until every container is empty and no task is running.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use weft_core::{
    EventKind, Handle, ObjectKind, RuntimeError, RuntimeResult, TaskProps,
};

use crate::config::RuntimeConfig;
use crate::event::{Event, SatisfyEffect, SubscribeEffect, Waiter};
use crate::observability::MetricsCollector;
use crate::region::{Region, RegionManager};
use crate::registry::HandleRegistry;
use crate::sched::{ItemProps, PlacementOracle, TaskDeque, WorkStealer};
use crate::task::{
    AddDependenceEffect, DepSpec, FinishScope, TaskFn, TaskInstance, TaskManager,
};
use crate::worker;

pub use weft_core::AccessMode;

/// Coarse lifecycle stage of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Runlevel {
    /// Constructed, not yet accepting work.
    Boot = 0,
    /// Accepting work; no workers running yet.
    Ready = 1,
    /// Workers executing.
    Compute = 2,
    /// Stopping or stopped.
    Shutdown = 3,
}

impl Runlevel {
    fn from_u8(value: u8) -> Runlevel {
        match value {
            0 => Runlevel::Boot,
            1 => Runlevel::Ready,
            2 => Runlevel::Compute,
            _ => Runlevel::Shutdown,
        }
    }
}

/// Direction of a runlevel transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunlevelPhase {
    /// Bringing the level up.
    Up,
    /// Tearing the level down.
    Down,
}

/// Handles returned by `instance_create`.
#[derive(Debug, Clone, Copy)]
pub struct CreatedInstance {
    /// The instance.
    pub handle: Handle,
    /// Its completion event, when the properties requested one.
    pub completion: Option<Handle>,
}

/// A parked-waiter signal: a condvar with no payload of its own.
pub(crate) struct Signal {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Signal {
    fn new() -> Self {
        Signal {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn wait_for(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        self.cv.wait_for(&mut guard, timeout);
    }

    pub(crate) fn notify_all(&self) {
        self.cv.notify_all();
    }

    pub(crate) fn notify_one(&self) {
        self.cv.notify_one();
    }
}

/// Shared state behind the facade.
pub(crate) struct Inner {
    config: RuntimeConfig,
    pub(crate) registry: Arc<HandleRegistry>,
    pub(crate) regions: RegionManager,
    pub(crate) tasks: TaskManager,
    pub(crate) sched: WorkStealer,
    pub(crate) metrics: Arc<MetricsCollector>,
    runlevel: AtomicU8,
    /// Tasks currently executing on workers; drives drain quiescence.
    running: AtomicUsize,
    /// Rotating target hint for externally originated gives.
    give_hint: AtomicUsize,
    first_error: Mutex<Option<RuntimeError>>,
    /// Parked idle workers; notified by `give`.
    pub(crate) idle: Signal,
    /// Blocked `wait_on` callers; notified by satisfies.
    bridge: Signal,
    /// Blocked `drain` callers; notified by task completion.
    quiesce: Signal,
    worker_deques: Mutex<Vec<Option<TaskDeque>>>,
    join_handles: Mutex<Vec<JoinHandle<()>>>,
    workers_spawned: AtomicBool,
}

impl Inner {
    pub(crate) fn enqueue_ready(&self, instance: &Arc<TaskInstance>) {
        let props = instance.props();
        let item_props = ItemProps {
            priority: props.priority,
            locality: props.locality,
        };
        let workers = self.sched.num_workers();
        let hint = self.give_hint.fetch_add(1, Ordering::Relaxed) % workers;
        self.sched.give(hint, instance.handle(), &item_props);
        self.idle.notify_one();
    }

    pub(crate) fn set_first_error(&self, error: RuntimeError) {
        let mut guard = self.first_error.lock();
        if guard.is_none() {
            *guard = Some(error);
        }
    }

    pub(crate) fn note_task_started(&self) {
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_task_stopped(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
        self.quiesce.notify_all();
    }

    pub(crate) fn request_shutdown(&self) {
        self.runlevel
            .store(Runlevel::Shutdown as u8, Ordering::Release);
        self.idle.notify_all();
        self.bridge.notify_all();
        self.quiesce.notify_all();
    }

    fn runlevel(&self) -> Runlevel {
        Runlevel::from_u8(self.runlevel.load(Ordering::Acquire))
    }
}

/// The runtime: cheap to clone, shared by all workers.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Builds a runtime from the configuration. Workers are not spawned
    /// until [`Runtime::start`].
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        Self::with_placement(config, None)
    }

    /// Builds a runtime with a placement oracle installed.
    pub fn with_placement(
        config: RuntimeConfig,
        placement: Option<Arc<dyn PlacementOracle>>,
    ) -> RuntimeResult<Self> {
        config
            .validate()
            .map_err(|message| RuntimeError::Config { message })?;

        if config.enable_tracing {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_level(true)
                .try_init()
                .ok(); // Ignore if already initialized
        }

        let registry = Arc::new(HandleRegistry::new());
        let metrics = Arc::new(MetricsCollector::new());
        let regions = RegionManager::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.region_budget_bytes,
        );
        let tasks = TaskManager::new(Arc::clone(&registry), Arc::clone(&metrics));
        let (sched, deques) = WorkStealer::new(
            config.workers,
            &config.scheduler,
            Arc::clone(&metrics),
            placement,
        );

        tracing::info!(workers = config.workers, "runtime initialized");

        Ok(Runtime {
            inner: Arc::new(Inner {
                config,
                registry,
                regions,
                tasks,
                sched,
                metrics,
                runlevel: AtomicU8::new(Runlevel::Ready as u8),
                running: AtomicUsize::new(0),
                give_hint: AtomicUsize::new(0),
                first_error: Mutex::new(None),
                idle: Signal::new(),
                bridge: Signal::new(),
                quiesce: Signal::new(),
                worker_deques: Mutex::new(deques.into_iter().map(Some).collect()),
                join_handles: Mutex::new(Vec::new()),
                workers_spawned: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    /// Current runlevel.
    pub fn runlevel(&self) -> Runlevel {
        self.inner.runlevel()
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Metrics counters.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// The handle registry (diagnostics and tests).
    pub fn registry(&self) -> &HandleRegistry {
        &self.inner.registry
    }

    /// Takes and clears the first recorded task fault.
    pub fn take_first_error(&self) -> Option<RuntimeError> {
        self.inner.first_error.lock().take()
    }

    // ---- templates and instances ----

    /// Creates a task template. Pure metadata.
    pub fn template_create(&self, func: TaskFn, paramc: u32, depc: u32) -> Handle {
        self.inner.tasks.create_template(func, paramc, depc)
    }

    /// Destroys a template.
    pub fn template_destroy(&self, template: Handle) -> RuntimeResult<()> {
        self.inner.registry.retire(template)
    }

    /// Creates a task instance outside any finish scope.
    pub fn instance_create(
        &self,
        template: Handle,
        params: Vec<u64>,
        deps: Vec<DepSpec>,
        props: TaskProps,
    ) -> RuntimeResult<CreatedInstance> {
        self.instance_create_in_scope(template, params, deps, props, None)
    }

    pub(crate) fn instance_create_in_scope(
        &self,
        template: Handle,
        params: Vec<u64>,
        deps: Vec<DepSpec>,
        props: TaskProps,
        scope: Option<Arc<FinishScope>>,
    ) -> RuntimeResult<CreatedInstance> {
        if self.runlevel() == Runlevel::Shutdown {
            return Err(RuntimeError::Shutdown);
        }
        let template = self.inner.registry.template(template)?;

        let (completion, own_scope) = if props.finish {
            let completion = self.event_create(EventKind::Sticky);
            let own = Arc::new(FinishScope::new(completion, scope.clone()));
            (Some(completion), Some(own))
        } else if props.output_event {
            (Some(self.event_create(EventKind::Once)), None)
        } else {
            (None, None)
        };

        let creation = self.inner.tasks.create_instance(
            template,
            params,
            deps,
            props,
            completion,
            scope,
            own_scope,
        )?;

        for sub in &creation.subscriptions {
            self.subscribe_slot(
                sub.event,
                Waiter {
                    task: creation.handle,
                    slot: sub.slot,
                    mode: sub.mode,
                },
            )?;
        }

        if creation.ready {
            let instance = self.inner.registry.task(creation.handle)?;
            self.inner.enqueue_ready(&instance);
        }

        Ok(CreatedInstance {
            handle: creation.handle,
            completion,
        })
    }

    /// Adds a dependence onto a not-yet-resolved slot. Must precede the
    /// slot's resolution.
    pub fn add_dependence(
        &self,
        source: Handle,
        instance: Handle,
        slot: u32,
        mode: AccessMode,
    ) -> RuntimeResult<()> {
        let task = self.inner.registry.task(instance)?;
        match self.inner.tasks.add_dependence(&task, slot, source, mode)? {
            AddDependenceEffect::Subscribe { event, mode } => self.subscribe_slot(
                event,
                Waiter {
                    task: instance,
                    slot,
                    mode,
                },
            ),
            AddDependenceEffect::Ready => {
                self.inner.enqueue_ready(&task);
                Ok(())
            }
            AddDependenceEffect::Waiting => Ok(()),
        }
    }

    // ---- events ----

    /// Creates an event with kind defaults (latch count 0, channel
    /// unbounded).
    pub fn event_create(&self, kind: EventKind) -> Handle {
        self.inner
            .registry
            .mint_event(|h| Event::new(h, kind, 0, 0))
    }

    /// Creates a latch event with an initial count.
    pub fn latch_create(&self, initial_count: i64) -> Handle {
        self.inner
            .registry
            .mint_event(|h| Event::new(h, EventKind::Latch, initial_count, 0))
    }

    /// Creates a bounded channel event (0 = unbounded).
    pub fn channel_create(&self, bound: usize) -> Handle {
        self.inner
            .registry
            .mint_event(|h| Event::new(h, EventKind::Channel, 0, bound))
    }

    /// Satisfies an event through slot 0 (a latch's decrement slot).
    pub fn event_satisfy(&self, event: Handle, payload: Handle) -> RuntimeResult<()> {
        self.event_satisfy_slot(event, payload, 0)
    }

    /// Satisfies a specific event slot.
    pub fn event_satisfy_slot(
        &self,
        event: Handle,
        payload: Handle,
        slot: u32,
    ) -> RuntimeResult<()> {
        if !payload.is_null() && payload.kind() != Some(ObjectKind::Region) {
            return Err(RuntimeError::KindMismatch {
                handle: payload,
                expected: ObjectKind::Region,
            });
        }
        let resolved = self.inner.registry.event(event)?;
        let effect = resolved.satisfy(payload, slot)?;
        self.inner.metrics.record_event_satisfied();
        self.apply_satisfy_effect(event, effect);
        self.inner.bridge.notify_all();
        Ok(())
    }

    /// Destroys a sticky or channel event. Once and latch events retire
    /// themselves when they fire.
    pub fn event_destroy(&self, event: Handle) -> RuntimeResult<()> {
        self.inner.registry.event(event)?;
        self.inner.registry.retire(event)
    }

    /// Blocks until a sticky event is satisfied and returns its payload.
    ///
    /// Non-persistent events (once, latch, channel) self-retire or cycle
    /// and are not safely re-observable from outside the task graph;
    /// waiting on them is rejected.
    pub fn wait_on(&self, event: Handle) -> RuntimeResult<Handle> {
        let resolved = self.inner.registry.event(event)?;
        if !resolved.kind().is_persistent() {
            return Err(RuntimeError::UnwaitableEvent {
                event,
                kind: resolved.kind(),
            });
        }
        loop {
            if let Some(payload) = resolved.satisfied_payload() {
                return Ok(payload);
            }
            if self.runlevel() == Runlevel::Shutdown {
                return Err(RuntimeError::Shutdown);
            }
            self.inner.bridge.wait_for(Duration::from_millis(5));
        }
    }

    // ---- regions ----

    /// Allocates a region and acquires it exclusive-write for the
    /// creator.
    pub fn region_create(&self, size: usize) -> RuntimeResult<(Handle, Arc<Region>)> {
        self.inner.regions.create(size)
    }

    /// Acquires a region under the given mode.
    pub fn region_acquire(&self, region: Handle, mode: AccessMode) -> RuntimeResult<Arc<Region>> {
        self.inner.regions.acquire(region, mode)
    }

    /// Releases one hold.
    pub fn region_release(&self, region: Handle) -> RuntimeResult<()> {
        self.inner.regions.release(region)
    }

    /// Destroys a region with no remaining holders.
    pub fn region_destroy(&self, region: Handle) -> RuntimeResult<()> {
        self.inner.regions.destroy(region)
    }

    // ---- scheduler bridge ----

    /// Takes one ready instance on behalf of `worker_id`. Bridge callers
    /// are served from inboxes and steal endpoints; returns `None` when
    /// no work is available.
    pub fn take(&self, worker_id: usize) -> Option<Handle> {
        self.inner.sched.take(worker_id, None)
    }

    /// Hands a ready instance to `worker_id`'s container.
    pub fn give(&self, worker_id: usize, instance: Handle) -> RuntimeResult<()> {
        let task = self.inner.registry.task(instance)?;
        let props = task.props();
        self.inner.sched.give(
            worker_id,
            instance,
            &ItemProps {
                priority: props.priority,
                locality: props.locality,
            },
        );
        self.inner.idle.notify_one();
        Ok(())
    }

    // ---- runlevels ----

    /// Spawns the worker threads (up-transition into `Compute`).
    pub fn start(&self) -> RuntimeResult<()> {
        self.switch_runlevel(Runlevel::Compute, RunlevelPhase::Up)
    }

    /// Signals workers to exit and joins them.
    pub fn stop(&self) -> RuntimeResult<()> {
        self.switch_runlevel(Runlevel::Shutdown, RunlevelPhase::Down)
    }

    /// Blocks until all containers are empty and no task is running.
    /// The decision to shut down afterwards stays with the caller.
    pub fn drain(&self) -> RuntimeResult<()> {
        loop {
            if self.inner.sched.is_empty() && self.inner.running.load(Ordering::Acquire) == 0 {
                tracing::debug!("drain complete");
                return Ok(());
            }
            if self.runlevel() == Runlevel::Shutdown {
                return Err(RuntimeError::Shutdown);
            }
            self.inner.quiesce.wait_for(Duration::from_millis(2));
        }
    }

    /// Applies a runlevel transition, propagating it to owned
    /// subcomponents before returning.
    pub fn switch_runlevel(&self, level: Runlevel, phase: RunlevelPhase) -> RuntimeResult<()> {
        // Children first, per the runlevel contract.
        self.inner.sched.switch_runlevel(level as u8);

        match (level, phase) {
            (Runlevel::Compute, RunlevelPhase::Up) => {
                self.inner
                    .runlevel
                    .store(Runlevel::Compute as u8, Ordering::Release);
                self.spawn_workers();
            }
            (Runlevel::Shutdown, _) => {
                self.inner.request_shutdown();
                let handles: Vec<_> = self.inner.join_handles.lock().drain(..).collect();
                for handle in handles {
                    let _ = handle.join();
                }
                tracing::info!("runtime stopped");
            }
            _ => {
                self.inner.runlevel.store(level as u8, Ordering::Release);
            }
        }
        Ok(())
    }

    fn spawn_workers(&self) {
        if self
            .inner
            .workers_spawned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // Already running; a second start is a no-op.
        }
        let mut deques = self.inner.worker_deques.lock();
        let mut handles = self.inner.join_handles.lock();
        for worker_id in 0..self.inner.sched.num_workers() {
            let local = deques.get_mut(worker_id).and_then(Option::take);
            let rt = self.clone();
            let join = std::thread::Builder::new()
                .name(format!("weft-worker-{worker_id}"))
                .spawn(move || worker::worker_loop(rt, worker_id, local))
                .expect("spawn worker thread");
            handles.push(join);
        }
        tracing::info!(workers = self.inner.sched.num_workers(), "workers started");
    }

    // ---- internal delivery plumbing ----

    /// Registers a waiter with an event, resolving synchronously when the
    /// event is already satisfied.
    fn subscribe_slot(&self, event: Handle, waiter: Waiter) -> RuntimeResult<()> {
        let resolved = self.inner.registry.event(event)?;
        match resolved.subscribe(waiter)? {
            SubscribeEffect::Parked => Ok(()),
            SubscribeEffect::Immediate(payload) => {
                self.deliver(waiter, payload);
                Ok(())
            }
        }
    }

    /// Performs the deliveries and retirement a satisfy produced.
    fn apply_satisfy_effect(&self, event: Handle, effect: SatisfyEffect) {
        for delivery in effect.deliveries {
            self.deliver(delivery.waiter, delivery.payload);
        }
        if effect.retire_event {
            if let Err(error) = self.inner.registry.retire(event) {
                tracing::warn!(%event, %error, "auto-destruct retire failed");
            }
        }
    }

    /// Resolves one waiter's slot; enqueues the instance when this was
    /// the last unresolved slot.
    fn deliver(&self, waiter: Waiter, payload: Handle) {
        let instance = match self.inner.registry.task(waiter.task) {
            Ok(instance) => instance,
            Err(error) => {
                tracing::warn!(task = %waiter.task, %error, "delivery to dead instance dropped");
                return;
            }
        };
        match self
            .inner
            .tasks
            .resolve_slot(&instance, waiter.slot, payload)
        {
            Ok(true) => self.inner.enqueue_ready(&instance),
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(task = %waiter.task, slot = waiter.slot, %error, "delivery failed");
            }
        }
    }
}
