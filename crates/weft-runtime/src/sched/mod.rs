//! Scheduler object layer and work-stealing dispatch.
//!
//! Ready task instances live in pluggable concurrent containers: the
//! per-worker work-stealing deque (the default), a per-worker priority
//! heap with several stealing policies, or keyed buckets for
//! phase-/location-grouped work. [`WorkStealer`] implements the take/give
//! protocol over whichever container the configuration selects.

pub mod bucket;
pub mod config;
pub mod deque;
pub mod heap;
pub mod object;
pub mod work_stealing;

pub use bucket::BucketList;
pub use config::{PushPolicy, ReadyContainer, SchedulerConfig, StealPolicy, VictimPolicy};
pub use deque::{work_stealing_deque, TaskDeque, TaskStealer};
pub use heap::PriorityHeap;
pub use object::{ItemProps, RemovePolicy, SchedulerObject};
pub use work_stealing::{PlacementOracle, WorkStealer};
