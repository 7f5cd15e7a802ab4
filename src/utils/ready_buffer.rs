//! A min-heap keyed by an orderable "readiness" marker (a [`Tick`] or a
//! [`Sequence`]). Used as the reorder buffer for ordered-reliable channels
//! and for buffering `Spawn`-before-`ComponentReplication` reordering
//! guarantees.

use std::collections::BinaryHeap;
use std::collections::HashMap;
use core::cmp::Reverse;

pub struct ReadyBuffer<K: Ord + Copy + std::hash::Hash, T> {
    heap: BinaryHeap<Reverse<(K, u64)>>,
    items: HashMap<(K, u64), T>,
    seq: u64,
}

impl<K: Ord + Copy + std::hash::Hash, T> Default for ReadyBuffer<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy + std::hash::Hash, T> ReadyBuffer<K, T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            items: HashMap::new(),
            seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Buffer `item` tagged with key `k`.
    pub fn push(&mut self, k: K, item: T) {
        let tag = (k, self.seq);
        self.seq += 1;
        self.heap.push(Reverse(tag));
        self.items.insert(tag, item);
    }

    /// Peek at the smallest key currently buffered.
    pub fn peek_key(&self) -> Option<K> {
        self.heap.peek().map(|Reverse((k, _))| *k)
    }

    /// Pop and return the item with the smallest key, iff that key is
    /// `<= threshold`. Returns `None` otherwise, leaving the buffer untouched.
    pub fn pop_if_ready(&mut self, threshold: K) -> Option<(K, T)> {
        let Reverse((k, _)) = *self.heap.peek()?;
        if k > threshold {
            return None;
        }
        let Reverse(tag) = self.heap.pop().unwrap();
        let item = self.items.remove(&tag).expect("tag present in items map");
        Some((tag.0, item))
    }

    /// Drain every buffered item regardless of key, in ascending key order.
    pub fn drain_all(&mut self) -> Vec<(K, T)> {
        let mut out = Vec::with_capacity(self.items.len());
        while let Some(Reverse(tag)) = self.heap.pop() {
            if let Some(item) = self.items.remove(&tag) {
                out.push((tag.0, item));
            }
        }
        out
    }
}
