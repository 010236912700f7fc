//! Memory region manager.
//!
//! Regions ("data blocks") are contiguous byte buffers acquired and
//! released around task execution under one of three access modes. The
//! holder ledger enforces the exclusivity invariant: the number of
//! exclusive holders is 0 or 1, and 0 whenever any shared reader is
//! registered. Fairness after a release is explicitly unordered; the next
//! hold goes to whichever acquirer locks the ledger first.
//!
//! A configurable byte budget stands in for the bulk-allocator
//! collaborator: creation reserves its bytes up front and fails with
//! `OutOfMemory` before any registry state exists, so a failed create has
//! no partial effects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use weft_core::{AccessMode, Handle, RuntimeError, RuntimeResult};

use crate::observability::MetricsCollector;
use crate::registry::HandleRegistry;

/// A contiguous addressable byte range plus its holder ledger.
pub struct Region {
    handle: Handle,
    size: usize,
    data: RwLock<Box<[u8]>>,
    ledger: Mutex<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    readers: usize,
    exclusive: Option<AccessMode>,
}

impl Ledger {
    fn holders(&self) -> usize {
        self.readers + usize::from(self.exclusive.is_some())
    }
}

impl Region {
    fn new(handle: Handle, size: usize, acquired_for_creator: bool) -> Self {
        Region {
            handle,
            size,
            data: RwLock::new(vec![0u8; size].into_boxed_slice()),
            ledger: Mutex::new(Ledger {
                readers: 0,
                exclusive: acquired_for_creator.then_some(AccessMode::ExclusiveWrite),
            }),
        }
    }

    /// The region's own handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Shared view of the region's bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Mutable view of the region's bytes. Callers must hold the region
    /// in an exclusive mode; the ledger, not this lock, is the
    /// user-visible exclusion mechanism.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Number of registered holds (diagnostic; racy by nature).
    pub fn holders(&self) -> usize {
        self.ledger.lock().holders()
    }

    fn try_acquire(&self, mode: AccessMode) -> RuntimeResult<()> {
        let mut ledger = self.ledger.lock();
        let conflict = match mode {
            AccessMode::ReadOnly => ledger.exclusive.is_some(),
            AccessMode::ExclusiveWrite | AccessMode::ReadWriteRelease => {
                ledger.exclusive.is_some() || ledger.readers > 0
            }
        };
        if conflict {
            return Err(RuntimeError::AccessDenied {
                region: self.handle,
                requested: mode,
            });
        }
        match mode {
            AccessMode::ReadOnly => ledger.readers += 1,
            _ => ledger.exclusive = Some(mode),
        }
        Ok(())
    }

    fn release_one(&self) -> RuntimeResult<()> {
        let mut ledger = self.ledger.lock();
        if ledger.exclusive.take().is_some() {
            return Ok(());
        }
        if ledger.readers > 0 {
            ledger.readers -= 1;
            return Ok(());
        }
        tracing::warn!(region = %self.handle, "release without a registered holder");
        Err(RuntimeError::NoHolder {
            region: self.handle,
        })
    }
}

/// Creates, acquires, releases, and destroys regions against the registry.
pub struct RegionManager {
    registry: Arc<HandleRegistry>,
    metrics: Arc<MetricsCollector>,
    /// Remaining allocation budget in bytes; `None` means unlimited.
    budget: Option<AtomicUsize>,
}

impl RegionManager {
    /// `budget_bytes` of 0 means unlimited.
    pub fn new(
        registry: Arc<HandleRegistry>,
        metrics: Arc<MetricsCollector>,
        budget_bytes: usize,
    ) -> Self {
        RegionManager {
            registry,
            metrics,
            budget: (budget_bytes != 0).then(|| AtomicUsize::new(budget_bytes)),
        }
    }

    /// Allocates a region and atomically acquires it in exclusive-write
    /// mode for the creator. No registry state is left behind on failure.
    pub fn create(&self, size: usize) -> RuntimeResult<(Handle, Arc<Region>)> {
        self.reserve(size)?;

        let handle = self
            .registry
            .mint_region(|h| Region::new(h, size, true));
        self.metrics.record_region_allocated(size);

        // Mint cannot fail past the reservation, so the resolve is of our
        // own freshly minted handle.
        let region = self.registry.region(handle)?;
        tracing::debug!(%handle, size, "region created");
        Ok((handle, region))
    }

    /// Registers a hold on the region under `mode`.
    pub fn acquire(&self, handle: Handle, mode: AccessMode) -> RuntimeResult<Arc<Region>> {
        let region = self.registry.region(handle)?;
        region.try_acquire(mode)?;
        Ok(region)
    }

    /// Relinquishes one hold. Which queued acquirer (if any) succeeds
    /// next is unspecified.
    pub fn release(&self, handle: Handle) -> RuntimeResult<()> {
        let region = self.registry.region(handle)?;
        region.release_one()
    }

    /// Destroys the region. Fails while any holder is registered.
    pub fn destroy(&self, handle: Handle) -> RuntimeResult<()> {
        let region = self.registry.region(handle)?;
        let holders = region.ledger.lock().holders();
        if holders > 0 {
            return Err(RuntimeError::RegionBusy {
                region: handle,
                holders,
            });
        }
        // Destroy racing an acquire on the same handle is a caller
        // contract violation; the holder check is made before retirement.
        self.registry.retire(handle)?;
        self.refund(region.size);
        self.metrics.record_region_destroyed(region.size);
        tracing::debug!(%handle, "region destroyed");
        Ok(())
    }

    fn reserve(&self, size: usize) -> RuntimeResult<()> {
        let Some(budget) = &self.budget else {
            return Ok(());
        };
        budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                available.checked_sub(size)
            })
            .map(|_| ())
            .map_err(|available| RuntimeError::OutOfMemory {
                requested: size,
                available,
            })
    }

    fn refund(&self, size: usize) {
        if let Some(budget) = &self.budget {
            budget.fetch_add(size, Ordering::AcqRel);
        }
    }
}
