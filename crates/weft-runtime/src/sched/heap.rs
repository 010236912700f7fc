//! Priority-ordered binary heap container.
//!
//! A locked array-backed min-heap: the owner pushes and pops the
//! best-priority (lowest cost) entry; thieves remove under one of the
//! configured policies — the single worst entry, the worse half, or a
//! locality-biased pick (selfish takes what is closest to the thief,
//! altruistic takes what is farthest from the victim).
//!
//! The heap invariant (parent cost <= both children) holds after every
//! mutation; `verify` walks the live range and asserts it, and is compiled
//! into debug builds only — never on the hot path of release builds.

use parking_lot::Mutex;

use weft_core::Handle;

use super::object::{ItemProps, RemovePolicy, SchedulerObject};

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    priority: i64,
    locality: Option<u64>,
    item: Handle,
}

/// Locked binary heap of ready instances, best-priority first.
pub struct PriorityHeap {
    entries: Mutex<Vec<HeapEntry>>,
    capacity: usize,
}

impl PriorityHeap {
    /// `capacity` of 0 means unbounded. Exceeding a fixed capacity is a
    /// fatal configuration error: dropping ready work would corrupt the
    /// task graph, so the runtime aborts instead.
    pub fn new(capacity: usize) -> Self {
        PriorityHeap {
            entries: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Inserts an item with its priority and locality hint.
    pub fn push(&self, item: Handle, props: &ItemProps) {
        let mut entries = self.entries.lock();
        if self.capacity != 0 && entries.len() == self.capacity {
            tracing::error!(capacity = self.capacity, "priority heap capacity exhausted");
            panic!("priority heap capacity exhausted ({}); ready work cannot be dropped", self.capacity);
        }
        entries.push(HeapEntry {
            priority: props.priority,
            locality: props.locality,
            item,
        });
        let last = entries.len() - 1;
        sift_up(&mut entries, last);
        verify(&entries);
    }

    /// Removes the best-priority entry.
    pub fn pop_best(&self) -> Option<Handle> {
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }
        let entry = remove_at(&mut entries, 0);
        verify(&entries);
        Some(entry.item)
    }

    /// Removes the worst-priority entry. The worst entry is always a
    /// leaf, so only the leaf range is scanned.
    pub fn pop_worst(&self) -> Option<Handle> {
        let mut entries = self.entries.lock();
        let index = worst_leaf(&entries)?;
        let entry = remove_at(&mut entries, index);
        verify(&entries);
        Some(entry.item)
    }

    /// Removes the worse half of the entries (ceil), worst first.
    pub fn steal_half(&self, out: &mut Vec<Handle>) {
        for entry in self.drain_worse_half() {
            out.push(entry.item);
        }
    }

    /// Moves the worse half of this heap into `other`, preserving each
    /// entry's priority and locality, and returns the single worst item
    /// for the thief to run. The two heaps are locked one at a time.
    pub fn steal_half_into(&self, other: &PriorityHeap) -> Option<Handle> {
        let mut stolen = self.drain_worse_half().into_iter();
        let first = stolen.next()?;
        for entry in stolen {
            other.push(
                entry.item,
                &ItemProps {
                    priority: entry.priority,
                    locality: entry.locality,
                },
            );
        }
        Some(first.item)
    }

    fn drain_worse_half(&self) -> Vec<HeapEntry> {
        let mut entries = self.entries.lock();
        let take = entries.len().div_ceil(2);
        let mut stolen = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(index) = worst_leaf(&entries) else {
                break;
            };
            stolen.push(remove_at(&mut entries, index));
        }
        verify(&entries);
        stolen
    }

    /// Removes the entry whose locality hint is closest to `thief`.
    /// Entries without a hint rank farthest.
    pub fn pop_selfish(&self, thief: u64) -> Option<Handle> {
        self.pop_by_distance(thief, false)
    }

    /// Removes the entry whose locality hint is farthest from `victim`,
    /// leaving victim-local work in place. Entries without a hint rank
    /// farthest and go first.
    pub fn pop_altruistic(&self, victim: u64) -> Option<Handle> {
        self.pop_by_distance(victim, true)
    }

    /// Approximate number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Approximate emptiness.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn pop_by_distance(&self, origin: u64, farthest: bool) -> Option<Handle> {
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }
        let distance = |entry: &HeapEntry| match entry.locality {
            Some(locality) => locality.abs_diff(origin),
            None => u64::MAX,
        };
        let index = if farthest {
            (0..entries.len()).max_by_key(|&i| distance(&entries[i]))?
        } else {
            (0..entries.len()).min_by_key(|&i| distance(&entries[i]))?
        };
        let entry = remove_at(&mut entries, index);
        verify(&entries);
        Some(entry.item)
    }
}

impl SchedulerObject for PriorityHeap {
    fn insert(&self, item: Handle, props: &ItemProps) {
        self.push(item, props);
    }

    fn remove(&self, count: usize, policy: RemovePolicy, out: &mut Vec<Handle>) {
        for _ in 0..count {
            let taken = match policy {
                RemovePolicy::PopBest | RemovePolicy::Bucket(_) => self.pop_best(),
                RemovePolicy::StealWorst => self.pop_worst(),
                RemovePolicy::StealHalf => {
                    self.steal_half(out);
                    return;
                }
                RemovePolicy::StealSelfish { thief } => self.pop_selfish(thief),
                RemovePolicy::StealAltruistic { victim } => self.pop_altruistic(victim),
            };
            match taken {
                Some(item) => out.push(item),
                None => break,
            }
        }
    }

    fn count(&self) -> usize {
        self.len()
    }
}

fn sift_up(entries: &mut [HeapEntry], mut index: usize) {
    while index > 0 {
        let parent = (index - 1) / 2;
        if entries[parent].priority <= entries[index].priority {
            break;
        }
        entries.swap(parent, index);
        index = parent;
    }
}

fn sift_down(entries: &mut [HeapEntry], mut index: usize) {
    let len = entries.len();
    loop {
        let left = 2 * index + 1;
        if left >= len {
            break;
        }
        let right = left + 1;
        let mut smallest = left;
        if right < len && entries[right].priority < entries[left].priority {
            smallest = right;
        }
        if entries[index].priority <= entries[smallest].priority {
            break;
        }
        entries.swap(index, smallest);
        index = smallest;
    }
}

/// Removes the entry at `index`, restoring the invariant around the hole.
fn remove_at(entries: &mut Vec<HeapEntry>, index: usize) -> HeapEntry {
    let last = entries.len() - 1;
    entries.swap(index, last);
    let removed = entries.pop().expect("nonempty by construction");
    if index < entries.len() {
        sift_down(entries, index);
        sift_up(entries, index);
    }
    removed
}

/// Index of the worst-priority entry; the worst is always among leaves.
fn worst_leaf(entries: &[HeapEntry]) -> Option<usize> {
    if entries.is_empty() {
        return None;
    }
    let first_leaf = entries.len() / 2;
    (first_leaf..entries.len()).max_by_key(|&i| entries[i].priority)
}

#[cfg(debug_assertions)]
fn verify(entries: &[HeapEntry]) {
    fn check(entries: &[HeapEntry], index: usize) {
        let left = 2 * index + 1;
        let right = left + 1;
        if left < entries.len() {
            assert!(
                entries[index].priority <= entries[left].priority,
                "heap invariant broken at {index}/{left}"
            );
            check(entries, left);
        }
        if right < entries.len() {
            assert!(
                entries[index].priority <= entries[right].priority,
                "heap invariant broken at {index}/{right}"
            );
            check(entries, right);
        }
    }
    if !entries.is_empty() {
        check(entries, 0);
    }
}

#[cfg(not(debug_assertions))]
fn verify(_entries: &[HeapEntry]) {}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::arena::SlotId;
    use weft_core::ObjectKind;

    fn item(index: u32) -> Handle {
        Handle::new(ObjectKind::Task, SlotId::new(index, 0))
    }

    fn props(priority: i64) -> ItemProps {
        ItemProps {
            priority,
            locality: None,
        }
    }

    fn local_props(priority: i64, locality: u64) -> ItemProps {
        ItemProps {
            priority,
            locality: Some(locality),
        }
    }

    #[test]
    fn pop_best_orders_by_priority() {
        let heap = PriorityHeap::new(0);
        heap.push(item(1), &props(30));
        heap.push(item(2), &props(10));
        heap.push(item(3), &props(20));

        assert_eq!(heap.pop_best(), Some(item(2)));
        assert_eq!(heap.pop_best(), Some(item(3)));
        assert_eq!(heap.pop_best(), Some(item(1)));
        assert_eq!(heap.pop_best(), None);
    }

    #[test]
    fn pop_worst_takes_the_costliest() {
        let heap = PriorityHeap::new(0);
        for (i, cost) in [(1, 5), (2, 50), (3, 25), (4, 40)] {
            heap.push(item(i), &props(cost));
        }
        assert_eq!(heap.pop_worst(), Some(item(2)));
        assert_eq!(heap.pop_worst(), Some(item(4)));
        assert_eq!(heap.pop_best(), Some(item(1)));
    }

    #[test]
    fn steal_half_takes_worse_half_worst_first() {
        let heap = PriorityHeap::new(0);
        for cost in 1..=6 {
            heap.push(item(cost as u32), &props(cost));
        }
        let mut out = Vec::new();
        heap.steal_half(&mut out);
        assert_eq!(out.len(), 3);
        // Worst-first order, and the best half stays behind.
        assert_eq!(out[0], item(6));
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.pop_best(), Some(item(1)));
    }

    #[test]
    fn selfish_prefers_thief_local_work() {
        let heap = PriorityHeap::new(0);
        heap.push(item(1), &local_props(10, 0));
        heap.push(item(2), &local_props(10, 3));
        heap.push(item(3), &local_props(10, 7));

        assert_eq!(heap.pop_selfish(3), Some(item(2)));
        assert_eq!(heap.pop_selfish(7), Some(item(3)));
    }

    #[test]
    fn altruistic_leaves_victim_local_work() {
        let heap = PriorityHeap::new(0);
        heap.push(item(1), &local_props(10, 0));
        heap.push(item(2), &local_props(10, 9));

        // Victim is worker 0: the far entry goes first.
        assert_eq!(heap.pop_altruistic(0), Some(item(2)));
        assert_eq!(heap.pop_altruistic(0), Some(item(1)));
    }

    #[test]
    fn empty_removals_yield_nothing() {
        let heap = PriorityHeap::new(0);
        assert_eq!(heap.pop_best(), None);
        assert_eq!(heap.pop_worst(), None);
        assert_eq!(heap.pop_selfish(0), None);
        let mut out = Vec::new();
        heap.steal_half(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn invariant_survives_mixed_churn() {
        let heap = PriorityHeap::new(0);
        // Interleave pushes and removals; verify() runs after each
        // mutation in debug builds.
        for i in 0..64i64 {
            heap.push(item(i as u32), &props((i * 37) % 17));
            if i % 3 == 0 {
                heap.pop_worst();
            }
            if i % 5 == 0 {
                heap.pop_best();
            }
        }
        // Drain through pop_best; verify() checks the invariant after
        // every removal.
        while heap.pop_best().is_some() {}
        assert!(heap.is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity exhausted")]
    fn fixed_capacity_overflow_is_fatal() {
        let heap = PriorityHeap::new(2);
        heap.push(item(1), &props(1));
        heap.push(item(2), &props(2));
        heap.push(item(3), &props(3));
    }
}
