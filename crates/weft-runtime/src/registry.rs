//! Handle registry.
//!
//! The single source of truth for object lifetime. Each object kind has
//! its own generational arena behind a read/write lock; handles pack the
//! kind, slot index, and generation, so resolving is a read-lock, an index,
//! and a generation compare. A retired handle fails with
//! [`RuntimeError::DanglingHandle`] instead of ever observing a stale
//! object.

use std::sync::Arc;

use parking_lot::RwLock;

use weft_core::arena::Arena;
use weft_core::{Handle, ObjectKind, RuntimeError, RuntimeResult};

use crate::event::Event;
use crate::region::Region;
use crate::task::{TaskInstance, TaskTemplate};

/// Per-kind arenas resolving handles to live objects.
#[derive(Default)]
pub struct HandleRegistry {
    templates: RwLock<Arena<Arc<TaskTemplate>>>,
    tasks: RwLock<Arena<Arc<TaskInstance>>>,
    events: RwLock<Arena<Arc<Event>>>,
    regions: RwLock<Arena<Arc<Region>>>,
}

impl HandleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a template handle. `build` receives the final handle so the
    /// object can embed its own identity.
    pub fn mint_template<F>(&self, build: F) -> Handle
    where
        F: FnOnce(Handle) -> TaskTemplate,
    {
        let mut arena = self.templates.write();
        let slot = arena.insert_with(|id| {
            Arc::new(build(Handle::new(ObjectKind::Template, id)))
        });
        Handle::new(ObjectKind::Template, slot)
    }

    /// Mints a task-instance handle.
    pub fn mint_task<F>(&self, build: F) -> Handle
    where
        F: FnOnce(Handle) -> TaskInstance,
    {
        let mut arena = self.tasks.write();
        let slot = arena.insert_with(|id| Arc::new(build(Handle::new(ObjectKind::Task, id))));
        Handle::new(ObjectKind::Task, slot)
    }

    /// Mints an event handle.
    pub fn mint_event<F>(&self, build: F) -> Handle
    where
        F: FnOnce(Handle) -> Event,
    {
        let mut arena = self.events.write();
        let slot = arena.insert_with(|id| Arc::new(build(Handle::new(ObjectKind::Event, id))));
        Handle::new(ObjectKind::Event, slot)
    }

    /// Mints a region handle.
    pub fn mint_region<F>(&self, build: F) -> Handle
    where
        F: FnOnce(Handle) -> Region,
    {
        let mut arena = self.regions.write();
        let slot = arena.insert_with(|id| Arc::new(build(Handle::new(ObjectKind::Region, id))));
        Handle::new(ObjectKind::Region, slot)
    }

    /// Resolves a template handle.
    pub fn template(&self, handle: Handle) -> RuntimeResult<Arc<TaskTemplate>> {
        Self::check_kind(handle, ObjectKind::Template)?;
        self.templates
            .read()
            .get(handle.slot())
            .cloned()
            .ok_or(RuntimeError::DanglingHandle { handle })
    }

    /// Resolves a task-instance handle.
    pub fn task(&self, handle: Handle) -> RuntimeResult<Arc<TaskInstance>> {
        Self::check_kind(handle, ObjectKind::Task)?;
        self.tasks
            .read()
            .get(handle.slot())
            .cloned()
            .ok_or(RuntimeError::DanglingHandle { handle })
    }

    /// Resolves an event handle.
    pub fn event(&self, handle: Handle) -> RuntimeResult<Arc<Event>> {
        Self::check_kind(handle, ObjectKind::Event)?;
        self.events
            .read()
            .get(handle.slot())
            .cloned()
            .ok_or(RuntimeError::DanglingHandle { handle })
    }

    /// Resolves a region handle.
    pub fn region(&self, handle: Handle) -> RuntimeResult<Arc<Region>> {
        Self::check_kind(handle, ObjectKind::Region)?;
        self.regions
            .read()
            .get(handle.slot())
            .cloned()
            .ok_or(RuntimeError::DanglingHandle { handle })
    }

    /// Retires a handle of any kind. The backing `Arc` may outlive
    /// retirement while in-flight readers drain, but the handle itself
    /// never resolves again.
    pub fn retire(&self, handle: Handle) -> RuntimeResult<()> {
        let kind = handle.kind().ok_or(RuntimeError::DanglingHandle { handle })?;
        let removed = match kind {
            ObjectKind::Template => self.templates.write().remove(handle.slot()).is_some(),
            ObjectKind::Task => self.tasks.write().remove(handle.slot()).is_some(),
            ObjectKind::Event => self.events.write().remove(handle.slot()).is_some(),
            ObjectKind::Region => self.regions.write().remove(handle.slot()).is_some(),
        };
        if removed {
            Ok(())
        } else {
            tracing::warn!(%handle, "retire of a handle that is not live");
            Err(RuntimeError::DanglingHandle { handle })
        }
    }

    /// Number of live objects per kind: (templates, tasks, events, regions).
    ///
    /// Counts are read under each arena's lock but the tuple as a whole is
    /// not a snapshot; use for diagnostics only.
    pub fn live_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.templates.read().len(),
            self.tasks.read().len(),
            self.events.read().len(),
            self.regions.read().len(),
        )
    }

    fn check_kind(handle: Handle, expected: ObjectKind) -> RuntimeResult<()> {
        if handle.is_null() {
            return Err(RuntimeError::DanglingHandle { handle });
        }
        if handle.kind() != Some(expected) {
            return Err(RuntimeError::KindMismatch { handle, expected });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::EventKind;

    #[test]
    fn mint_resolve_retire_round_trip() {
        let registry = HandleRegistry::new();

        let handle = registry.mint_event(|h| Event::new(h, EventKind::Sticky, 0, 0));
        assert_eq!(handle.kind(), Some(ObjectKind::Event));

        let event = registry.event(handle).expect("live event");
        assert_eq!(event.handle(), handle);

        registry.retire(handle).expect("retire once");
        assert!(matches!(
            registry.event(handle),
            Err(RuntimeError::DanglingHandle { .. })
        ));
        assert!(matches!(
            registry.retire(handle),
            Err(RuntimeError::DanglingHandle { .. })
        ));
    }

    #[test]
    fn reused_slot_rejects_old_handle() {
        let registry = HandleRegistry::new();

        let first = registry.mint_event(|h| Event::new(h, EventKind::Once, 0, 0));
        registry.retire(first).unwrap();

        let second = registry.mint_event(|h| Event::new(h, EventKind::Once, 0, 0));
        // Same slot, new generation.
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        assert!(registry.event(first).is_err());
        assert!(registry.event(second).is_ok());
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let registry = HandleRegistry::new();
        let event = registry.mint_event(|h| Event::new(h, EventKind::Once, 0, 0));

        assert!(matches!(
            registry.region(event),
            Err(RuntimeError::KindMismatch { .. })
        ));
        assert!(matches!(
            registry.task(Handle::NULL),
            Err(RuntimeError::DanglingHandle { .. })
        ));
    }

    #[test]
    fn concurrent_mints_stay_unique() {
        let registry = Arc::new(HandleRegistry::new());
        let mut joins = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            joins.push(std::thread::spawn(move || {
                (0..100)
                    .map(|_| registry.mint_event(|h| Event::new(h, EventKind::Once, 0, 0)))
                    .collect::<Vec<_>>()
            }));
        }

        let mut all = Vec::new();
        for join in joins {
            all.extend(join.join().unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }
}
