//! Runtime errors.
//!
//! Two families share this enum. Allocation-class errors (`OutOfMemory`,
//! `AccessDenied`, `RegionBusy`, `ChannelFull`) are ordinary recoverable
//! results the caller may retry or report. Invariant-class errors
//! (`DanglingHandle`, `KindMismatch`, `DoubleSatisfy`, `LatchUnderflow`,
//! `SlotAlreadyResolved`, `UnwaitableEvent`) are programming defects: the
//! raise sites emit a warn-level trace and reject the operation, and a
//! correct program never observes them. The dependency graph cannot be
//! reasoned about after an invariant-class error, so the runtime makes no
//! recovery attempt beyond reporting it.

use thiserror::Error;

use crate::types::{AccessMode, EventKind, Handle, ObjectKind};

/// Errors surfaced by the runtime core.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Region allocation exceeded the configured byte budget.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes the allocation asked for.
        requested: usize,
        /// Bytes left in the budget.
        available: usize,
    },

    /// Region acquire conflicted with a held exclusive mode.
    #[error("access denied on {region}: {requested} conflicts with current holders")]
    AccessDenied {
        /// Region whose acquisition failed.
        region: Handle,
        /// Mode the caller requested.
        requested: AccessMode,
    },

    /// Region destroy attempted while holders remain registered.
    #[error("region {region} still has {holders} holder(s)")]
    RegionBusy {
        /// Region whose destruction failed.
        region: Handle,
        /// Number of holds still registered.
        holders: usize,
    },

    /// Release of a region the caller does not hold.
    #[error("region {region} has no registered holder to release")]
    NoHolder {
        /// The region.
        region: Handle,
    },

    /// A retired or unknown handle was used.
    #[error("dangling handle {handle}")]
    DanglingHandle {
        /// The stale handle.
        handle: Handle,
    },

    /// A handle of the wrong object kind was passed.
    #[error("handle {handle} is not a {expected}")]
    KindMismatch {
        /// The offending handle.
        handle: Handle,
        /// Kind the operation required.
        expected: ObjectKind,
    },

    /// Second satisfy of a once or sticky event.
    #[error("event {event} already satisfied")]
    DoubleSatisfy {
        /// The event that was satisfied twice.
        event: Handle,
    },

    /// Latch decremented after it already fired.
    #[error("latch {event} decremented below zero")]
    LatchUnderflow {
        /// The latch event.
        event: Handle,
    },

    /// Channel satisfy attempted past the buffered-generation bound.
    #[error("channel {event} is full ({bound} buffered satisfies)")]
    ChannelFull {
        /// The channel event.
        event: Handle,
        /// Configured bound on outstanding generations.
        bound: usize,
    },

    /// Satisfy directed at a slot the event kind does not define.
    #[error("event {event} has no slot {slot}")]
    InvalidEventSlot {
        /// The event.
        event: Handle,
        /// The undefined slot index.
        slot: u32,
    },

    /// Blocking wait attempted on a non-persistent event kind.
    #[error("cannot wait on {kind} event {event}: only sticky events are re-observable")]
    UnwaitableEvent {
        /// The event passed to the wait bridge.
        event: Handle,
        /// Its (non-persistent) kind.
        kind: EventKind,
    },

    /// Dependence added to a slot that was already bound or resolved.
    #[error("slot {slot} of {instance} already has a dependence")]
    SlotAlreadyResolved {
        /// The task instance.
        instance: Handle,
        /// The offending slot index.
        slot: u32,
    },

    /// Slot index outside the template's declared dependency arity.
    #[error("slot {slot} out of range for {instance} (depc {depc})")]
    SlotOutOfRange {
        /// The task instance.
        instance: Handle,
        /// The offending slot index.
        slot: u32,
        /// The template's dependency-slot count.
        depc: u32,
    },

    /// Parameter or dependency count did not match the template.
    #[error("template {template} expects {expected} {what}, got {got}")]
    ArityMismatch {
        /// The template.
        template: Handle,
        /// What was miscounted ("params" or "deps").
        what: &'static str,
        /// Declared count.
        expected: u32,
        /// Provided count.
        got: u32,
    },

    /// Operation attempted against a stopped or stopping runtime.
    #[error("runtime is shut down")]
    Shutdown,

    /// A task function reported a failure.
    #[error("task {instance} failed: {message}")]
    TaskFailed {
        /// The failing instance.
        instance: Handle,
        /// The failure description.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// What failed validation.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SlotId;

    #[test]
    fn display_includes_handles() {
        let region = Handle::new(ObjectKind::Region, SlotId::new(5, 0));
        let err = RuntimeError::AccessDenied {
            region,
            requested: AccessMode::ExclusiveWrite,
        };
        let text = err.to_string();
        assert!(text.contains("region:5.g0"));
        assert!(text.contains("exclusive-write"));
    }

    #[test]
    fn display_out_of_memory() {
        let err = RuntimeError::OutOfMemory {
            requested: 4096,
            available: 1024,
        };
        assert_eq!(
            err.to_string(),
            "out of memory: requested 4096 bytes, 1024 available"
        );
    }
}
