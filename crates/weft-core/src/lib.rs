//! weft-core - Fundamental types for the weft dataflow runtime.
//!
//! This crate provides the identity layer (handles and the generational
//! arena behind them), the access-mode and event-kind vocabulary, the task
//! lifecycle states, and the runtime error taxonomy that every other weft
//! component depends on.

pub mod arena;
pub mod error;
pub mod types;

pub use arena::{Arena, SlotId};
pub use error::RuntimeError;
pub use types::{
    AccessMode, EventKind, Handle, ObjectKind, TaskProps, TaskState, LATCH_DECR_SLOT,
    LATCH_INCR_SLOT,
};

/// Crate-wide result alias.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_export() {
        let h = Handle::new(ObjectKind::Event, SlotId::new(7, 2));
        assert_eq!(h.kind(), Some(ObjectKind::Event));
        assert_eq!(h.index(), 7);

        assert!(matches!(AccessMode::ReadOnly, AccessMode::ReadOnly));
        assert_eq!(TaskState::from_u8(TaskState::Ready.as_u8()), Some(TaskState::Ready));
    }
}
