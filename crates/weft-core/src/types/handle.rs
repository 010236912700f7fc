//! Opaque object handles.
//!
//! A [`Handle`] is the only way runtime components refer to each other's
//! objects. It packs the object kind, the arena slot index, and the slot's
//! generation counter into a single `u64`, so a stale handle (one whose slot
//! has since been reused) is detected in O(1) at resolution time without any
//! global bookkeeping.

use core::fmt;

use crate::arena::SlotId;

/// Number of bits reserved for the slot index (low bits).
const INDEX_BITS: u32 = 32;
/// Number of bits reserved for the generation counter.
pub(crate) const GENERATION_BITS: u32 = 28;
/// Number of bits reserved for the object kind (high bits).
const KIND_BITS: u32 = 4;

const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u64 = (1 << GENERATION_BITS) - 1;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;

const _: () = assert!(INDEX_BITS + GENERATION_BITS + KIND_BITS == 64);

/// The kind of runtime object a handle resolves to.
///
/// Discriminants start at 1 so that no live handle packs to zero; the
/// all-zero word is reserved for [`Handle::NULL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    /// Reusable task descriptor (function + arities).
    Template = 1,
    /// A task instance with bound parameters and dependency slots.
    Task = 2,
    /// A dependency-carrying event.
    Event = 3,
    /// An addressable memory region.
    Region = 4,
}

impl ObjectKind {
    /// Decode a kind from its packed representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ObjectKind::Template),
            2 => Some(ObjectKind::Task),
            3 => Some(ObjectKind::Event),
            4 => Some(ObjectKind::Region),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Template => "template",
            ObjectKind::Task => "task",
            ObjectKind::Event => "event",
            ObjectKind::Region => "region",
        };
        f.write_str(name)
    }
}

/// Opaque identifier for a live runtime object.
///
/// Layout: `[kind:4][generation:28][index:32]`. At any instant a handle
/// resolves to at most one live object; after the object is retired the
/// embedded generation no longer matches the slot and resolution fails.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// The null handle. Used for pre-satisfied dependency slots and for
    /// event payloads that carry no data.
    pub const NULL: Handle = Handle(0);

    /// Pack a handle from an object kind and an arena slot id.
    pub fn new(kind: ObjectKind, slot: SlotId) -> Self {
        let packed = ((kind as u64 & KIND_MASK) << (INDEX_BITS + GENERATION_BITS))
            | ((u64::from(slot.generation()) & GENERATION_MASK) << INDEX_BITS)
            | (u64::from(slot.index()) & INDEX_MASK);
        Handle(packed)
    }

    /// Reconstruct a handle from its raw packed form.
    ///
    /// Intended for wire/bridge layers that shuttle handles as integers;
    /// the value is not validated beyond the kind field at resolve time.
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// The raw packed form.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True for [`Handle::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The object kind encoded in this handle, or `None` for null/garbage.
    pub fn kind(self) -> Option<ObjectKind> {
        ObjectKind::from_u8(((self.0 >> (INDEX_BITS + GENERATION_BITS)) & KIND_MASK) as u8)
    }

    /// The arena slot index.
    pub const fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    /// The generation counter the handle was minted with.
    pub const fn generation(self) -> u32 {
        ((self.0 >> INDEX_BITS) & GENERATION_MASK) as u32
    }

    /// The slot id portion (index + generation) of this handle.
    pub const fn slot(self) -> SlotId {
        SlotId::new(self.index(), self.generation())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Handle(null)");
        }
        match self.kind() {
            Some(kind) => write!(f, "Handle({}:{}.g{})", kind, self.index(), self.generation()),
            None => write!(f, "Handle(raw:{:#x})", self.0),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("null");
        }
        match self.kind() {
            Some(kind) => write!(f, "{}:{}.g{}", kind, self.index(), self.generation()),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trip() {
        let slot = SlotId::new(0xDEAD_BEEF, 0x0FF_1234);
        let h = Handle::new(ObjectKind::Region, slot);
        assert_eq!(h.kind(), Some(ObjectKind::Region));
        assert_eq!(h.index(), 0xDEAD_BEEF);
        assert_eq!(h.generation(), 0x0FF_1234);
        assert_eq!(h.slot(), slot);
    }

    #[test]
    fn null_is_never_a_live_kind() {
        assert!(Handle::NULL.is_null());
        assert_eq!(Handle::NULL.kind(), None);

        // Kind discriminants start at 1, so even slot 0 generation 0
        // packs to a nonzero word.
        let h = Handle::new(ObjectKind::Template, SlotId::new(0, 0));
        assert!(!h.is_null());
    }

    #[test]
    fn raw_round_trip() {
        let h = Handle::new(ObjectKind::Event, SlotId::new(42, 7));
        assert_eq!(Handle::from_raw(h.raw()), h);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Handle::NULL.to_string(), "null");
        let h = Handle::new(ObjectKind::Task, SlotId::new(3, 1));
        assert_eq!(h.to_string(), "task:3.g1");
    }
}
