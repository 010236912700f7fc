//! Memory-region access modes.

use core::fmt;

/// The exclusivity class under which a memory region is held.
///
/// The holder-count invariant: the number of exclusive holders is 0 or 1,
/// and is 0 whenever any shared reader is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Many concurrent holders, no writes.
    ReadOnly,
    /// At most one holder, no concurrent readers.
    ExclusiveWrite,
    /// One writer; the hold is released automatically when the owning
    /// task finishes.
    ReadWriteRelease,
}

impl AccessMode {
    /// Whether this mode excludes all other holders.
    pub fn is_exclusive(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessMode::ReadOnly => "read-only",
            AccessMode::ExclusiveWrite => "exclusive-write",
            AccessMode::ReadWriteRelease => "read-write-release",
        };
        f.write_str(name)
    }
}
