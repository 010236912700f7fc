//! Event subsystem.
//!
//! Events are the dependency currency between task instances. Each event
//! is a lock-guarded state machine; `satisfy` and `subscribe` mutate state
//! under the event's mutex and *return* the resulting delivery work
//! ([`SatisfyEffect`] / [`SubscribeEffect`]) for the caller to perform
//! after the lock is dropped. Because the satisfied state and the captured
//! waiter set are written under one lock, a subscribe racing a satisfy
//! either lands in the captured set or observes the satisfied state and
//! resolves synchronously — the notification cannot be lost.
//!
//! Kind semantics:
//! - `Once` fires a single time and self-retires after delivering.
//! - `Sticky` stays readable forever; a second satisfy is rejected.
//! - `Latch` counts through two slots (0 decrements, 1 increments) and
//!   fires exactly once when a transition lands the counter on zero, then
//!   self-retires.
//! - `Channel` pairs satisfies with subscribers FIFO, buffering up to a
//!   bound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use weft_core::{
    AccessMode, EventKind, Handle, RuntimeError, RuntimeResult, LATCH_DECR_SLOT, LATCH_INCR_SLOT,
};

/// A registered interest: resolve `slot` of `task` when the event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    /// Subscribed task instance.
    pub task: Handle,
    /// Dependency slot to resolve.
    pub slot: u32,
    /// Access mode the slot declared.
    pub mode: AccessMode,
}

/// One slot resolution owed to a subscriber.
#[derive(Debug, Clone, Copy)]
pub struct Delivery {
    /// Who to notify.
    pub waiter: Waiter,
    /// Payload handle (a region or null).
    pub payload: Handle,
}

/// What a successful satisfy obligates the caller to do.
#[derive(Debug, Default)]
pub struct SatisfyEffect {
    /// Slot resolutions to perform, in no guaranteed order.
    pub deliveries: Vec<Delivery>,
    /// The event auto-destructs: retire its handle after delivering.
    pub retire_event: bool,
}

/// Outcome of a subscription.
#[derive(Debug)]
pub enum SubscribeEffect {
    /// Interest recorded; a future satisfy will deliver.
    Parked,
    /// The event was already satisfied (or a channel generation was
    /// buffered): resolve the slot now with this payload.
    Immediate(Handle),
}

#[derive(Debug)]
enum EventCore {
    /// Once/sticky/latch before the trigger.
    Pending { waiters: Vec<Waiter> },
    /// Once/sticky/latch after the trigger.
    Satisfied { payload: Handle },
    /// Channel state: buffered satisfies and parked subscribers. At most
    /// one of the two queues is nonempty.
    Channel {
        buffered: VecDeque<Handle>,
        parked: VecDeque<Waiter>,
    },
}

/// A dependency carrier. See the module docs for kind semantics.
pub struct Event {
    handle: Handle,
    kind: EventKind,
    /// Latch running count; unused for other kinds.
    counter: AtomicI64,
    /// Channel bound on buffered satisfies; unused for other kinds.
    bound: usize,
    core: Mutex<EventCore>,
}

impl Event {
    /// `latch_init` seeds the latch counter; `channel_bound` caps a
    /// channel's buffered generations (0 means unbounded). Both are
    /// ignored for kinds they do not apply to.
    pub fn new(handle: Handle, kind: EventKind, latch_init: i64, channel_bound: usize) -> Self {
        let core = match kind {
            EventKind::Channel => EventCore::Channel {
                buffered: VecDeque::new(),
                parked: VecDeque::new(),
            },
            _ => EventCore::Pending {
                waiters: Vec::new(),
            },
        };
        Event {
            handle,
            kind,
            counter: AtomicI64::new(latch_init),
            bound: channel_bound,
            core: Mutex::new(core),
        }
    }

    /// The event's own handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The behavioral kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Satisfies the event through `slot`.
    ///
    /// Slot 0 is the only slot for once/sticky/channel events. For a
    /// latch, slot 0 decrements and slot 1 increments; the thread whose
    /// transition lands the counter on zero receives the delivery work.
    pub fn satisfy(&self, payload: Handle, slot: u32) -> RuntimeResult<SatisfyEffect> {
        match self.kind {
            EventKind::Latch => self.satisfy_latch(payload, slot),
            EventKind::Channel => {
                self.expect_slot_zero(slot)?;
                self.satisfy_channel(payload)
            }
            EventKind::Once | EventKind::Sticky => {
                self.expect_slot_zero(slot)?;
                self.satisfy_single(payload)
            }
        }
    }

    /// Registers `waiter`'s interest. An already-satisfied event resolves
    /// synchronously via [`SubscribeEffect::Immediate`].
    pub fn subscribe(&self, waiter: Waiter) -> RuntimeResult<SubscribeEffect> {
        let mut core = self.core.lock();
        match &mut *core {
            EventCore::Pending { waiters } => {
                waiters.push(waiter);
                Ok(SubscribeEffect::Parked)
            }
            EventCore::Satisfied { payload } => Ok(SubscribeEffect::Immediate(*payload)),
            EventCore::Channel { buffered, parked } => match buffered.pop_front() {
                Some(payload) => Ok(SubscribeEffect::Immediate(payload)),
                None => {
                    parked.push_back(waiter);
                    Ok(SubscribeEffect::Parked)
                }
            },
        }
    }

    /// The satisfied payload of a persistent event, if satisfied yet.
    /// Used by the blocking bridge; meaningless for channels.
    pub fn satisfied_payload(&self) -> Option<Handle> {
        match &*self.core.lock() {
            EventCore::Satisfied { payload } => Some(*payload),
            _ => None,
        }
    }

    /// Current latch count (diagnostic).
    pub fn latch_count(&self) -> i64 {
        self.counter.load(Ordering::Acquire)
    }

    fn expect_slot_zero(&self, slot: u32) -> RuntimeResult<()> {
        if slot != 0 {
            return Err(RuntimeError::InvalidEventSlot {
                event: self.handle,
                slot,
            });
        }
        Ok(())
    }

    fn satisfy_single(&self, payload: Handle) -> RuntimeResult<SatisfyEffect> {
        let mut core = self.core.lock();
        match &mut *core {
            EventCore::Pending { waiters } => {
                let deliveries = waiters
                    .drain(..)
                    .map(|waiter| Delivery { waiter, payload })
                    .collect();
                *core = EventCore::Satisfied { payload };
                Ok(SatisfyEffect {
                    deliveries,
                    retire_event: self.kind == EventKind::Once,
                })
            }
            EventCore::Satisfied { .. } => {
                tracing::warn!(event = %self.handle, kind = %self.kind, "double satisfy");
                Err(RuntimeError::DoubleSatisfy { event: self.handle })
            }
            EventCore::Channel { .. } => unreachable!("channel core under once/sticky kind"),
        }
    }

    fn satisfy_latch(&self, payload: Handle, slot: u32) -> RuntimeResult<SatisfyEffect> {
        let delta: i64 = match slot {
            LATCH_DECR_SLOT => -1,
            LATCH_INCR_SLOT => 1,
            _ => {
                return Err(RuntimeError::InvalidEventSlot {
                    event: self.handle,
                    slot,
                })
            }
        };

        // The transition that lands the counter exactly on zero wins the
        // trigger; fetch_add makes that thread unique.
        let new_count = self.counter.fetch_add(delta, Ordering::AcqRel) + delta;
        tracing::trace!(event = %self.handle, new_count, "latch transition");
        if new_count != 0 {
            return Ok(SatisfyEffect::default());
        }

        let mut core = self.core.lock();
        match &mut *core {
            EventCore::Pending { waiters } => {
                let deliveries = waiters
                    .drain(..)
                    .map(|waiter| Delivery { waiter, payload })
                    .collect();
                *core = EventCore::Satisfied { payload };
                Ok(SatisfyEffect {
                    deliveries,
                    retire_event: true,
                })
            }
            // A transition through zero after the latch already fired:
            // the counter was driven below zero and back.
            EventCore::Satisfied { .. } => {
                tracing::warn!(event = %self.handle, "latch transitioned to zero after firing");
                Err(RuntimeError::LatchUnderflow { event: self.handle })
            }
            EventCore::Channel { .. } => unreachable!("channel core under latch kind"),
        }
    }

    fn satisfy_channel(&self, payload: Handle) -> RuntimeResult<SatisfyEffect> {
        let mut core = self.core.lock();
        let EventCore::Channel { buffered, parked } = &mut *core else {
            unreachable!("non-channel core under channel kind");
        };

        if let Some(waiter) = parked.pop_front() {
            return Ok(SatisfyEffect {
                deliveries: vec![Delivery { waiter, payload }],
                retire_event: false,
            });
        }
        if self.bound != 0 && buffered.len() >= self.bound {
            return Err(RuntimeError::ChannelFull {
                event: self.handle,
                bound: self.bound,
            });
        }
        buffered.push_back(payload);
        Ok(SatisfyEffect::default())
    }
}
