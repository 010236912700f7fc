//! Task templates, instances, and the dependency-satisfaction engine.
//!
//! A template is a reusable descriptor (function pointer + arities); an
//! instance binds concrete parameters and a fixed array of dependency
//! slots. Each instance carries an atomic pending count initialized to the
//! number of unresolved slots; every slot resolution decrements it, and
//! the thread whose decrement reaches zero owns the one and only enqueue
//! of the instance.
//!
//! Finish scopes track transitive descendant completion: every instance
//! created inside a scope increments it and decrements it on finish; a
//! scope draining to zero satisfies its completion event and then
//! decrements its parent scope.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use weft_core::{
    AccessMode, Handle, ObjectKind, RuntimeError, RuntimeResult, TaskProps, TaskState,
};

use crate::observability::MetricsCollector;
use crate::registry::HandleRegistry;
use crate::runtime::Runtime;

/// The task function: explicit context, bound parameters, resolved
/// dependency views. The returned handle (a region or nothing) becomes
/// the payload of the instance's completion event.
pub type TaskFn = fn(&TaskContext<'_>, &[u64], &[DepView]) -> RuntimeResult<Option<Handle>>;

/// Immutable task descriptor.
pub struct TaskTemplate {
    handle: Handle,
    func: TaskFn,
    paramc: u32,
    depc: u32,
}

impl TaskTemplate {
    pub(crate) fn new(handle: Handle, func: TaskFn, paramc: u32, depc: u32) -> Self {
        TaskTemplate {
            handle,
            func,
            paramc,
            depc,
        }
    }

    /// The template's own handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Declared parameter count.
    pub fn paramc(&self) -> u32 {
        self.paramc
    }

    /// Declared dependency-slot count.
    pub fn depc(&self) -> u32 {
        self.depc
    }

    pub(crate) fn func(&self) -> TaskFn {
        self.func
    }
}

/// What a dependency slot is bound to at instance creation.
#[derive(Debug, Clone, Copy)]
pub enum DepSpec {
    /// Pre-satisfied with a null payload.
    Null,
    /// Left unbound; must be bound through `add_dependence` before it can
    /// resolve.
    Later,
    /// Subscribe to an event under the given access mode.
    Event(Handle, AccessMode),
    /// Resolve immediately with a region payload.
    Region(Handle, AccessMode),
}

/// A resolved dependency as seen by the task function.
#[derive(Debug, Clone, Copy)]
pub struct DepView {
    /// The payload handle: a region or [`Handle::NULL`].
    pub payload: Handle,
    /// The access mode the slot declared (and the worker acquired).
    pub mode: AccessMode,
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    Unbound,
    Subscribed { mode: AccessMode },
    Resolved { payload: Handle, mode: AccessMode },
}

/// Tracks descendant completion for a finish instance.
pub struct FinishScope {
    outstanding: AtomicUsize,
    completion: Handle,
    parent: Option<Arc<FinishScope>>,
}

impl FinishScope {
    /// A fresh scope counts its owning instance.
    pub(crate) fn new(completion: Handle, parent: Option<Arc<FinishScope>>) -> Self {
        FinishScope {
            outstanding: AtomicUsize::new(1),
            completion,
            parent,
        }
    }

    /// The sticky event satisfied when the scope drains.
    pub fn completion(&self) -> Handle {
        self.completion
    }

    pub(crate) fn increment(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements this scope and walks up through any parents that drain
    /// as a result. Returns the completion events to satisfy, innermost
    /// first.
    pub(crate) fn decrement_cascade(self: &Arc<Self>) -> Vec<Handle> {
        let mut fired = Vec::new();
        let mut current = Some(Arc::clone(self));
        while let Some(scope) = current {
            if scope.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
                break;
            }
            fired.push(scope.completion);
            current = scope.parent.clone();
        }
        fired
    }
}

/// A template binding with concrete parameters and dependency slots.
pub struct TaskInstance {
    handle: Handle,
    template: Arc<TaskTemplate>,
    params: Box<[u64]>,
    slots: Mutex<Box<[SlotState]>>,
    pending: AtomicUsize,
    state: AtomicU8,
    props: TaskProps,
    /// Completion event satisfied in the worker epilogue (once kind), or
    /// by the finish-scope drain (sticky kind) when `own_scope` is set.
    completion: Option<Handle>,
    /// Scope this instance was created inside, incremented at creation.
    scope: Option<Arc<FinishScope>>,
    /// The scope this instance owns when created with the finish property.
    own_scope: Option<Arc<FinishScope>>,
}

impl TaskInstance {
    /// The instance's own handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The instance's completion event, if one was requested.
    pub fn completion(&self) -> Option<Handle> {
        self.completion
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire)).expect("valid packed task state")
    }

    /// Unresolved slot count (diagnostic).
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Scheduling properties the instance was created with.
    pub fn props(&self) -> TaskProps {
        self.props
    }

    pub(crate) fn template(&self) -> &Arc<TaskTemplate> {
        &self.template
    }

    pub(crate) fn params(&self) -> &[u64] {
        &self.params
    }

    pub(crate) fn own_scope(&self) -> Option<&Arc<FinishScope>> {
        self.own_scope.as_ref()
    }

    pub(crate) fn enclosing_scope(&self) -> Option<&Arc<FinishScope>> {
        self.scope.as_ref()
    }

    /// The scope instances created by this task's function belong to.
    pub(crate) fn child_scope(&self) -> Option<Arc<FinishScope>> {
        self.own_scope.clone().or_else(|| self.scope.clone())
    }

    /// Snapshot of the resolved dependency views, slot order preserved.
    /// Only meaningful once the instance is ready.
    pub(crate) fn dep_views(&self) -> Vec<DepView> {
        self.slots
            .lock()
            .iter()
            .map(|slot| match slot {
                SlotState::Resolved { payload, mode } => DepView {
                    payload: *payload,
                    mode: *mode,
                },
                SlotState::Unbound | SlotState::Subscribed { .. } => {
                    unreachable!("unresolved slot on a ready instance")
                }
            })
            .collect()
    }
}

/// Instruction set handed back to the caller of `create_instance`.
pub(crate) struct InstanceCreation {
    pub handle: Handle,
    /// All slots resolved at creation: enqueue now.
    pub ready: bool,
    /// Event subscriptions the caller must register.
    pub subscriptions: Vec<PendingSubscription>,
}

/// One subscription owed to the event subsystem.
pub(crate) struct PendingSubscription {
    pub event: Handle,
    pub slot: u32,
    pub mode: AccessMode,
}

/// Outcome of `add_dependence`.
pub(crate) enum AddDependenceEffect {
    /// The caller must subscribe the slot to this event.
    Subscribe { event: Handle, mode: AccessMode },
    /// The slot resolved immediately and the instance became ready.
    Ready,
    /// The slot resolved immediately; other slots remain pending.
    Waiting,
}

/// Creates and tracks templates and instances.
pub struct TaskManager {
    registry: Arc<HandleRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl TaskManager {
    pub fn new(registry: Arc<HandleRegistry>, metrics: Arc<MetricsCollector>) -> Self {
        TaskManager { registry, metrics }
    }

    /// Mints a template. Pure metadata; no side effects beyond the
    /// registry allocation.
    pub fn create_template(&self, func: TaskFn, paramc: u32, depc: u32) -> Handle {
        self.registry
            .mint_template(|h| TaskTemplate::new(h, func, paramc, depc))
    }

    /// Builds an instance in `Created` state, binds its slots, and
    /// reports what the caller still owes: subscriptions for event-bound
    /// slots, and an enqueue if everything resolved at creation.
    pub(crate) fn create_instance(
        &self,
        template: Arc<TaskTemplate>,
        params: Vec<u64>,
        deps: Vec<DepSpec>,
        props: TaskProps,
        completion: Option<Handle>,
        enclosing: Option<Arc<FinishScope>>,
        own_scope: Option<Arc<FinishScope>>,
    ) -> RuntimeResult<InstanceCreation> {
        if params.len() != template.paramc() as usize {
            return Err(RuntimeError::ArityMismatch {
                template: template.handle(),
                what: "params",
                expected: template.paramc(),
                got: params.len() as u32,
            });
        }
        if deps.len() != template.depc() as usize {
            return Err(RuntimeError::ArityMismatch {
                template: template.handle(),
                what: "deps",
                expected: template.depc(),
                got: deps.len() as u32,
            });
        }

        let mut slots = Vec::with_capacity(deps.len());
        let mut pending = 0usize;
        let mut subscriptions = Vec::new();
        for (i, spec) in deps.iter().enumerate() {
            match *spec {
                DepSpec::Null => slots.push(SlotState::Resolved {
                    payload: Handle::NULL,
                    mode: AccessMode::ReadOnly,
                }),
                DepSpec::Region(region, mode) => {
                    if region.kind() != Some(ObjectKind::Region) {
                        return Err(RuntimeError::KindMismatch {
                            handle: region,
                            expected: ObjectKind::Region,
                        });
                    }
                    slots.push(SlotState::Resolved {
                        payload: region,
                        mode,
                    });
                }
                DepSpec::Event(event, mode) => {
                    pending += 1;
                    slots.push(SlotState::Subscribed { mode });
                    subscriptions.push(PendingSubscription {
                        event,
                        slot: i as u32,
                        mode,
                    });
                }
                DepSpec::Later => {
                    pending += 1;
                    slots.push(SlotState::Unbound);
                }
            }
        }

        let ready = pending == 0;
        let initial_state = if ready {
            TaskState::Ready
        } else {
            TaskState::Waiting
        };

        // The instance joins its enclosing scope before it can run.
        if let Some(scope) = &enclosing {
            scope.increment();
        }

        let handle = self.registry.mint_task(|h| TaskInstance {
            handle: h,
            template: Arc::clone(&template),
            params: params.into_boxed_slice(),
            slots: Mutex::new(slots.into_boxed_slice()),
            pending: AtomicUsize::new(pending),
            state: AtomicU8::new(initial_state.as_u8()),
            props,
            completion,
            scope: enclosing,
            own_scope,
        });

        self.metrics.record_task_created();
        if ready {
            self.metrics.record_task_ready();
        }
        tracing::debug!(%handle, pending, ready, "instance created");

        Ok(InstanceCreation {
            handle,
            ready,
            subscriptions,
        })
    }

    /// Resolves one dependency slot. Returns `true` when this resolution
    /// was the last one and the caller must enqueue the instance — the
    /// atomic decrement guarantees exactly one caller sees `true`.
    pub(crate) fn resolve_slot(
        &self,
        instance: &Arc<TaskInstance>,
        slot: u32,
        payload: Handle,
    ) -> RuntimeResult<bool> {
        {
            let mut slots = instance.slots.lock();
            let state = slots
                .get_mut(slot as usize)
                .ok_or(RuntimeError::SlotOutOfRange {
                    instance: instance.handle,
                    slot,
                    depc: instance.template.depc(),
                })?;
            match *state {
                SlotState::Subscribed { mode } => {
                    *state = SlotState::Resolved { payload, mode };
                }
                SlotState::Unbound => {
                    *state = SlotState::Resolved {
                        payload,
                        mode: AccessMode::ReadOnly,
                    };
                }
                SlotState::Resolved { .. } => {
                    tracing::warn!(instance = %instance.handle, slot, "slot resolved twice");
                    return Err(RuntimeError::SlotAlreadyResolved {
                        instance: instance.handle,
                        slot,
                    });
                }
            }
        }

        let was_last = instance.pending.fetch_sub(1, Ordering::AcqRel) == 1;
        if was_last {
            instance
                .state
                .store(TaskState::Ready.as_u8(), Ordering::Release);
            self.metrics.record_task_ready();
        }
        Ok(was_last)
    }

    /// Binds a dependence onto a not-yet-resolved slot. Event sources
    /// yield a subscription obligation; null and region sources resolve
    /// the slot immediately.
    pub(crate) fn add_dependence(
        &self,
        instance: &Arc<TaskInstance>,
        slot: u32,
        source: Handle,
        mode: AccessMode,
    ) -> RuntimeResult<AddDependenceEffect> {
        let depc = instance.template.depc();
        if slot >= depc {
            return Err(RuntimeError::SlotOutOfRange {
                instance: instance.handle,
                slot,
                depc,
            });
        }

        if source.kind() == Some(ObjectKind::Event) {
            let mut slots = instance.slots.lock();
            match slots[slot as usize] {
                SlotState::Unbound => {
                    slots[slot as usize] = SlotState::Subscribed { mode };
                    Ok(AddDependenceEffect::Subscribe {
                        event: source,
                        mode,
                    })
                }
                _ => {
                    tracing::warn!(instance = %instance.handle, slot, "dependence added twice");
                    Err(RuntimeError::SlotAlreadyResolved {
                        instance: instance.handle,
                        slot,
                    })
                }
            }
        } else {
            // Null or region source: the slot resolves right away.
            if !source.is_null() && source.kind() != Some(ObjectKind::Region) {
                return Err(RuntimeError::KindMismatch {
                    handle: source,
                    expected: ObjectKind::Region,
                });
            }
            let became_ready = self.resolve_unbound(instance, slot, source, mode)?;
            Ok(if became_ready {
                AddDependenceEffect::Ready
            } else {
                AddDependenceEffect::Waiting
            })
        }
    }

    /// Marks the ready-to-running transition. Returns `false` if another
    /// worker won the race (cannot normally happen: steal exclusivity
    /// means each handle is dequeued once).
    pub(crate) fn begin_run(&self, instance: &Arc<TaskInstance>) -> bool {
        let won = instance
            .state
            .compare_exchange(
                TaskState::Ready.as_u8(),
                TaskState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.metrics.record_task_start();
        }
        won
    }

    /// Returns a running instance to the ready state. Used when a worker
    /// hit a region-mode conflict and must hand the instance back to the
    /// scheduler instead of blocking on the region.
    pub(crate) fn requeue(&self, instance: &Arc<TaskInstance>) {
        instance
            .state
            .store(TaskState::Ready.as_u8(), Ordering::Release);
        self.metrics.record_task_requeued();
    }

    /// Finishes the instance: state transition plus the completion-event
    /// satisfies the caller owes. A finish instance's completion fires
    /// through its scope drain; a plain instance's completion fires here
    /// with the function's returned payload.
    pub(crate) fn finish(
        &self,
        instance: &Arc<TaskInstance>,
        returned: Handle,
    ) -> Vec<(Handle, Handle)> {
        instance
            .state
            .store(TaskState::Finished.as_u8(), Ordering::Release);

        let mut completions = Vec::new();
        if let Some(own) = instance.own_scope() {
            for event in own.decrement_cascade() {
                completions.push((event, Handle::NULL));
            }
        } else {
            if let Some(completion) = instance.completion {
                completions.push((completion, returned));
            }
            if let Some(scope) = instance.enclosing_scope() {
                for event in scope.decrement_cascade() {
                    completions.push((event, Handle::NULL));
                }
            }
        }
        completions
    }

    /// Resolves a slot that must still be unbound; the check and the
    /// write happen under one lock acquisition.
    fn resolve_unbound(
        &self,
        instance: &Arc<TaskInstance>,
        slot: u32,
        payload: Handle,
        mode: AccessMode,
    ) -> RuntimeResult<bool> {
        {
            let mut slots = instance.slots.lock();
            match slots[slot as usize] {
                SlotState::Unbound => {
                    slots[slot as usize] = SlotState::Resolved { payload, mode };
                }
                _ => {
                    tracing::warn!(instance = %instance.handle, slot, "dependence added twice");
                    return Err(RuntimeError::SlotAlreadyResolved {
                        instance: instance.handle,
                        slot,
                    });
                }
            }
        }
        let was_last = instance.pending.fetch_sub(1, Ordering::AcqRel) == 1;
        if was_last {
            instance
                .state
                .store(TaskState::Ready.as_u8(), Ordering::Release);
            self.metrics.record_task_ready();
        }
        Ok(was_last)
    }
}

/// Per-invocation context handed to every task function: the current
/// worker, the running instance, and the innermost finish scope. All
/// runtime operations a task performs flow through here — there is no
/// hidden "current task" global.
pub struct TaskContext<'rt> {
    runtime: &'rt Runtime,
    worker_id: Option<usize>,
    current: Option<Handle>,
    scope: Option<Arc<FinishScope>>,
}

impl<'rt> TaskContext<'rt> {
    pub(crate) fn new(
        runtime: &'rt Runtime,
        worker_id: Option<usize>,
        current: Option<Handle>,
        scope: Option<Arc<FinishScope>>,
    ) -> Self {
        TaskContext {
            runtime,
            worker_id,
            current,
            scope,
        }
    }

    /// The runtime this context belongs to.
    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    /// The executing worker, if invoked from a worker thread.
    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    /// The running instance's handle, if invoked from a task.
    pub fn current_task(&self) -> Option<Handle> {
        self.current
    }

    /// Creates a child instance inside the current finish scope (if any).
    pub fn instance_create(
        &self,
        template: Handle,
        params: Vec<u64>,
        deps: Vec<DepSpec>,
        props: TaskProps,
    ) -> RuntimeResult<crate::runtime::CreatedInstance> {
        self.runtime
            .instance_create_in_scope(template, params, deps, props, self.scope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &TaskContext<'_>, _: &[u64], _: &[DepView]) -> RuntimeResult<Option<Handle>> {
        Ok(None)
    }

    fn fixture() -> (Arc<HandleRegistry>, TaskManager) {
        let registry = Arc::new(HandleRegistry::new());
        let manager = TaskManager::new(Arc::clone(&registry), Arc::new(MetricsCollector::new()));
        (registry, manager)
    }

    #[test]
    fn template_is_pure_metadata() {
        let (registry, manager) = fixture();
        let handle = manager.create_template(noop, 2, 3);
        let template = registry.template(handle).unwrap();
        assert_eq!(template.paramc(), 2);
        assert_eq!(template.depc(), 3);
    }

    #[test]
    fn all_null_slots_are_ready_at_creation() {
        let (registry, manager) = fixture();
        let th = manager.create_template(noop, 0, 2);
        let template = registry.template(th).unwrap();

        let creation = manager
            .create_instance(
                template,
                vec![],
                vec![DepSpec::Null, DepSpec::Null],
                TaskProps::default(),
                None,
                None,
                None,
            )
            .unwrap();
        assert!(creation.ready);
        assert!(creation.subscriptions.is_empty());

        let instance = registry.task(creation.handle).unwrap();
        assert_eq!(instance.state(), TaskState::Ready);
        assert_eq!(instance.pending(), 0);
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let (registry, manager) = fixture();
        let th = manager.create_template(noop, 1, 1);
        let template = registry.template(th).unwrap();

        assert!(matches!(
            manager.create_instance(
                Arc::clone(&template),
                vec![],
                vec![DepSpec::Null],
                TaskProps::default(),
                None,
                None,
                None,
            ),
            Err(RuntimeError::ArityMismatch { what: "params", .. })
        ));
        assert!(matches!(
            manager.create_instance(template, vec![7], vec![], TaskProps::default(), None, None, None),
            Err(RuntimeError::ArityMismatch { what: "deps", .. })
        ));
    }

    #[test]
    fn last_resolution_wins_the_enqueue() {
        let (registry, manager) = fixture();
        let th = manager.create_template(noop, 0, 3);
        let template = registry.template(th).unwrap();

        let creation = manager
            .create_instance(
                template,
                vec![],
                vec![DepSpec::Later, DepSpec::Later, DepSpec::Later],
                TaskProps::default(),
                None,
                None,
                None,
            )
            .unwrap();
        assert!(!creation.ready);

        let instance = registry.task(creation.handle).unwrap();
        assert_eq!(instance.state(), TaskState::Waiting);

        assert!(!manager.resolve_slot(&instance, 0, Handle::NULL).unwrap());
        assert!(!manager.resolve_slot(&instance, 2, Handle::NULL).unwrap());
        assert!(manager.resolve_slot(&instance, 1, Handle::NULL).unwrap());
        assert_eq!(instance.state(), TaskState::Ready);
    }

    #[test]
    fn double_resolution_is_rejected() {
        let (registry, manager) = fixture();
        let th = manager.create_template(noop, 0, 2);
        let template = registry.template(th).unwrap();

        let creation = manager
            .create_instance(
                template,
                vec![],
                vec![DepSpec::Later, DepSpec::Later],
                TaskProps::default(),
                None,
                None,
                None,
            )
            .unwrap();
        let instance = registry.task(creation.handle).unwrap();

        manager.resolve_slot(&instance, 0, Handle::NULL).unwrap();
        assert!(matches!(
            manager.resolve_slot(&instance, 0, Handle::NULL),
            Err(RuntimeError::SlotAlreadyResolved { slot: 0, .. })
        ));
    }

    #[test]
    fn add_dependence_rejects_bound_slots() {
        let (registry, manager) = fixture();
        let eh = registry.mint_event(|h| {
            crate::event::Event::new(h, weft_core::EventKind::Once, 0, 0)
        });

        let th = manager.create_template(noop, 0, 1);
        let template = registry.template(th).unwrap();
        let creation = manager
            .create_instance(
                template,
                vec![],
                vec![DepSpec::Later],
                TaskProps::default(),
                None,
                None,
                None,
            )
            .unwrap();
        let instance = registry.task(creation.handle).unwrap();

        assert!(matches!(
            manager.add_dependence(&instance, 0, eh, AccessMode::ReadOnly),
            Ok(AddDependenceEffect::Subscribe { .. })
        ));
        assert!(matches!(
            manager.add_dependence(&instance, 0, eh, AccessMode::ReadOnly),
            Err(RuntimeError::SlotAlreadyResolved { .. })
        ));
    }

    #[test]
    fn finish_scope_cascades_to_parent() {
        let (registry, _manager) = fixture();
        let outer_ev = registry.mint_event(|h| {
            crate::event::Event::new(h, weft_core::EventKind::Sticky, 0, 0)
        });
        let inner_ev = registry.mint_event(|h| {
            crate::event::Event::new(h, weft_core::EventKind::Sticky, 0, 0)
        });

        let outer = Arc::new(FinishScope::new(outer_ev, None));
        let inner = Arc::new(FinishScope::new(inner_ev, Some(Arc::clone(&outer))));

        // A child in the inner scope keeps both alive.
        inner.increment();
        assert!(inner.decrement_cascade().is_empty()); // child finishes
        let fired = inner.decrement_cascade(); // inner owner finishes
        assert_eq!(fired, vec![inner_ev, outer_ev]);
    }

    #[test]
    fn slot_out_of_range() {
        let (registry, manager) = fixture();
        let th = manager.create_template(noop, 0, 1);
        let template = registry.template(th).unwrap();
        let creation = manager
            .create_instance(
                template,
                vec![],
                vec![DepSpec::Later],
                TaskProps::default(),
                None,
                None,
                None,
            )
            .unwrap();
        let instance = registry.task(creation.handle).unwrap();

        assert!(matches!(
            manager.add_dependence(&instance, 5, Handle::NULL, AccessMode::ReadOnly),
            Err(RuntimeError::SlotOutOfRange { slot: 5, depc: 1, .. })
        ));
    }
}
