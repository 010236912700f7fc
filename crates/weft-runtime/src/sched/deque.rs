//! Work-stealing deque endpoints.
//!
//! The owner pushes and pops at the tail with no locking against itself;
//! thieves pop from the head. The two concerns get two types: [`TaskDeque`]
//! is the owner endpoint moved onto its worker thread, [`TaskStealer`] is
//! the shared thief endpoint. An empty deque yields `None`, never blocks.

use crossbeam_deque::{Steal, Stealer, Worker};

use weft_core::Handle;

/// Creates a deque pair: the owner endpoint and its thief endpoint.
pub fn work_stealing_deque() -> (TaskDeque, TaskStealer) {
    let worker = Worker::new_lifo();
    let stealer = worker.stealer();
    (TaskDeque { worker }, TaskStealer { stealer })
}

/// Owner endpoint of a work-stealing deque.
pub struct TaskDeque {
    worker: Worker<Handle>,
}

impl TaskDeque {
    /// Pushes at the tail.
    pub fn push(&self, item: Handle) {
        self.worker.push(item);
    }

    /// Pops from the tail (most recently pushed first).
    pub fn pop(&self) -> Option<Handle> {
        self.worker.pop()
    }

    /// Approximate length.
    pub fn len(&self) -> usize {
        self.worker.len()
    }

    /// Approximate emptiness.
    pub fn is_empty(&self) -> bool {
        self.worker.is_empty()
    }
}

/// Thief endpoint of a work-stealing deque.
#[derive(Clone)]
pub struct TaskStealer {
    stealer: Stealer<Handle>,
}

impl TaskStealer {
    /// Attempts to steal one item from the head, retrying once on a
    /// conflicted race.
    pub fn steal(&self) -> Option<Handle> {
        match self.stealer.steal() {
            Steal::Success(item) => Some(item),
            Steal::Empty => None,
            Steal::Retry => match self.stealer.steal() {
                Steal::Success(item) => Some(item),
                _ => None,
            },
        }
    }

    /// Approximate length of the underlying deque.
    pub fn len(&self) -> usize {
        self.stealer.len()
    }

    /// Approximate emptiness.
    pub fn is_empty(&self) -> bool {
        self.stealer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_core::arena::SlotId;
    use weft_core::ObjectKind;

    fn item(index: u32) -> Handle {
        Handle::new(ObjectKind::Task, SlotId::new(index, 0))
    }

    #[test]
    fn owner_pops_lifo() {
        let (deque, _stealer) = work_stealing_deque();
        deque.push(item(1));
        deque.push(item(2));
        assert_eq!(deque.pop(), Some(item(2)));
        assert_eq!(deque.pop(), Some(item(1)));
        assert_eq!(deque.pop(), None);
    }

    #[test]
    fn thief_steals_from_head() {
        let (deque, stealer) = work_stealing_deque();
        deque.push(item(1));
        deque.push(item(2));
        assert_eq!(stealer.steal(), Some(item(1)));
        assert_eq!(deque.pop(), Some(item(2)));
    }

    #[test]
    fn empty_returns_none_for_both_ends() {
        let (deque, stealer) = work_stealing_deque();
        assert_eq!(deque.pop(), None);
        assert_eq!(stealer.steal(), None);
    }

    #[test]
    fn single_item_goes_to_exactly_one_end() {
        // One push, then an owner pop racing a thief steal: exactly one
        // side receives the item.
        for _ in 0..64 {
            let (deque, stealer) = work_stealing_deque();
            deque.push(item(7));

            let stealer = Arc::new(stealer);
            let thief = {
                let stealer = Arc::clone(&stealer);
                std::thread::spawn(move || stealer.steal())
            };
            let owned = deque.pop();
            let stolen = thief.join().unwrap();

            match (owned, stolen) {
                (Some(x), None) | (None, Some(x)) => assert_eq!(x, item(7)),
                other => panic!("item duplicated or lost: {other:?}"),
            }
        }
    }
}
