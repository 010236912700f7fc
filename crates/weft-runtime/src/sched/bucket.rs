//! Keyed bucket container.
//!
//! Groups ready items by a caller-chosen key (a phase index, a placement
//! domain) with FIFO order inside each bucket. Used by placement-oriented
//! collaborators; carries the same insert/remove/count contract as the
//! other containers.

use std::collections::VecDeque;

use dashmap::DashMap;

use weft_core::Handle;

use super::object::{ItemProps, RemovePolicy, SchedulerObject};

/// Bucket key used when an item carries no locality hint.
const DEFAULT_BUCKET: u64 = 0;

/// Concurrent map of FIFO buckets.
#[derive(Default)]
pub struct BucketList {
    buckets: DashMap<u64, VecDeque<Handle>>,
}

impl BucketList {
    /// Creates an empty bucket list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts into the bucket named by the item's locality hint.
    pub fn push(&self, item: Handle, key: u64) {
        self.buckets.entry(key).or_default().push_back(item);
    }

    /// Pops FIFO from the named bucket.
    pub fn pop_bucket(&self, key: u64) -> Option<Handle> {
        self.buckets.get_mut(&key)?.pop_front()
    }

    /// Pops from any nonempty bucket, unspecified order across buckets.
    pub fn pop_any(&self) -> Option<Handle> {
        for mut entry in self.buckets.iter_mut() {
            if let Some(item) = entry.pop_front() {
                return Some(item);
            }
        }
        None
    }

    /// Approximate total item count.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|entry| entry.len()).sum()
    }

    /// Approximate emptiness.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchedulerObject for BucketList {
    fn insert(&self, item: Handle, props: &ItemProps) {
        self.push(item, props.locality.unwrap_or(DEFAULT_BUCKET));
    }

    fn remove(&self, count: usize, policy: RemovePolicy, out: &mut Vec<Handle>) {
        for _ in 0..count {
            let taken = match policy {
                RemovePolicy::Bucket(key) => self.pop_bucket(key),
                _ => self.pop_any(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::arena::SlotId;
    use weft_core::ObjectKind;

    fn item(index: u32) -> Handle {
        Handle::new(ObjectKind::Task, SlotId::new(index, 0))
    }

    #[test]
    fn buckets_are_fifo() {
        let buckets = BucketList::new();
        buckets.push(item(1), 3);
        buckets.push(item(2), 3);
        buckets.push(item(3), 9);

        assert_eq!(buckets.pop_bucket(3), Some(item(1)));
        assert_eq!(buckets.pop_bucket(3), Some(item(2)));
        assert_eq!(buckets.pop_bucket(3), None);
        assert_eq!(buckets.pop_bucket(9), Some(item(3)));
    }

    #[test]
    fn pop_any_drains_everything() {
        let buckets = BucketList::new();
        for i in 0..6 {
            buckets.push(item(i), u64::from(i % 3));
        }
        let mut seen = std::collections::HashSet::new();
        while let Some(taken) = buckets.pop_any() {
            assert!(seen.insert(taken));
        }
        assert_eq!(seen.len(), 6);
        assert!(buckets.is_empty());
    }

    #[test]
    fn trait_contract_routes_by_policy() {
        let buckets = BucketList::new();
        let props = ItemProps {
            priority: 0,
            locality: Some(4),
        };
        buckets.insert(item(1), &props);

        let mut out = Vec::new();
        buckets.remove(1, RemovePolicy::Bucket(4), &mut out);
        assert_eq!(out, vec![item(1)]);

        // Empty removal yields nothing, never an error.
        out.clear();
        buckets.remove(3, RemovePolicy::PopBest, &mut out);
        assert!(out.is_empty());
    }
}
