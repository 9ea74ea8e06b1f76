//! Bounded FIFO dedup set.
//!
//! Backs the per-connection nonce guard and recent-sequence set. When the set
//! is full the OLDEST entry is evicted, so the eviction horizon is exactly the
//! last `capacity` insertions.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// A set holding at most `capacity` values, evicting in insertion order.
#[derive(Debug, Clone)]
pub struct BoundedSet<T> {
    members: HashSet<T>,
    order: VecDeque<T>,
    capacity: usize,
}

impl<T: Eq + Hash + Copy> BoundedSet<T> {
    /// Create an empty set. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            members: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Check membership.
    pub fn contains(&self, value: &T) -> bool {
        self.members.contains(value)
    }

    /// Insert a value.
    ///
    /// Returns `false` if it was already present. Evicts the oldest member when
    /// the set is full.
    pub fn insert(&mut self, value: T) -> bool {
        if self.members.contains(&value) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(value);
        self.order.push_back(value);
        true
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Maximum number of members.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_duplicate() {
        let mut set = BoundedSet::new(4);
        assert!(set.insert(1u64));
        assert!(!set.insert(1));
        assert!(set.contains(&1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut set = BoundedSet::new(3);
        for v in 1u64..=3 {
            assert!(set.insert(v));
        }

        assert!(set.insert(4));
        assert_eq!(set.len(), 3);
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert!(set.contains(&3));
        assert!(set.contains(&4));

        // Re-inserting a live member does not refresh or evict anything
        assert!(!set.insert(2));
        assert!(set.insert(5));
        assert!(!set.contains(&2));
        assert!(set.contains(&3));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut set = BoundedSet::new(16);
        for v in 0u64..1000 {
            set.insert(v);
            assert!(set.len() <= set.capacity());
        }
        assert!((984u64..1000).all(|v| set.contains(&v)));
    }

    #[test]
    fn test_nonce_members() {
        let mut set = BoundedSet::new(2);
        assert!(set.insert([1u8; 12]));
        assert!(!set.insert([1u8; 12]));
        assert!(set.insert([2u8; 12]));
        assert!(set.insert([3u8; 12]));
        assert!(!set.contains(&[1u8; 12]));
    }
}
