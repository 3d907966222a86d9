//! Sequence barrier: restores input order from out-of-order completions.
//!
//! Completions are pushed as `(order, payload)` and held in a binary min-heap
//! until every lower order has been released. Memory is bounded by the
//! out-of-order window, not by the total number of items.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    /// The order was already released by a previous drain.
    #[error("order {order} already released (next expected is {next})")]
    Stale { order: usize, next: usize },

    /// The order is already buffered and waiting for release.
    #[error("order {order} inserted twice")]
    Duplicate { order: usize },
}

/// A completion waiting in the barrier.
#[derive(Debug)]
pub struct SequenceNode<T> {
    pub order: usize,
    pub payload: T,
}

// BinaryHeap is a max-heap; invert the comparison so the lowest order sits on top.
impl<T> Ord for SequenceNode<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.order.cmp(&self.order)
    }
}

impl<T> PartialOrd for SequenceNode<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for SequenceNode<T> {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl<T> Eq for SequenceNode<T> {}

#[derive(Debug)]
pub struct SequenceBarrier<T> {
    heap: BinaryHeap<SequenceNode<T>>,
    pending: HashSet<usize>,
    next: usize,
}

impl<T> Default for SequenceBarrier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SequenceBarrier<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            next: 0,
        }
    }

    /// Buffer a completion. O(log k) in the current window size.
    pub fn insert(&mut self, order: usize, payload: T) -> Result<(), SequenceError> {
        if order < self.next {
            return Err(SequenceError::Stale {
                order,
                next: self.next,
            });
        }
        if !self.pending.insert(order) {
            return Err(SequenceError::Duplicate { order });
        }
        tracing::trace!(order, window = self.heap.len() + 1, "barrier insert");
        self.heap.push(SequenceNode { order, payload });
        Ok(())
    }

    /// Release every buffered node whose order is next in line.
    ///
    /// Never blocks: stops at the first gap and leaves the rest buffered.
    pub fn drain_ready(&mut self) -> DrainReady<'_, T> {
        DrainReady { barrier: self }
    }

    /// The order the barrier is waiting for.
    pub fn next_expected(&self) -> usize {
        self.next
    }

    /// Size of the out-of-order window.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn pop_ready(&mut self) -> Option<SequenceNode<T>> {
        if self.heap.peek()?.order != self.next {
            return None;
        }
        let node = self.heap.pop()?;
        self.pending.remove(&node.order);
        self.next += 1;
        Some(node)
    }
}

/// Iterator returned by [`SequenceBarrier::drain_ready`].
pub struct DrainReady<'a, T> {
    barrier: &'a mut SequenceBarrier<T>,
}

impl<T> Iterator for DrainReady<'_, T> {
    type Item = SequenceNode<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.barrier.pop_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drained(barrier: &mut SequenceBarrier<&'static str>) -> Vec<usize> {
        barrier.drain_ready().map(|n| n.order).collect()
    }

    #[test]
    fn emits_in_ascending_order() {
        let mut barrier = SequenceBarrier::new();
        let mut emitted = Vec::new();
        for order in [4, 0, 2, 1, 3] {
            barrier.insert(order, "x").unwrap();
            emitted.extend(drained(&mut barrier));
        }
        assert_eq!(emitted, vec![0, 1, 2, 3, 4]);
        assert!(barrier.is_empty());
        assert_eq!(barrier.next_expected(), 5);
    }

    #[test]
    fn stops_at_gap() {
        let mut barrier = SequenceBarrier::new();
        barrier.insert(1, "b").unwrap();
        barrier.insert(2, "c").unwrap();
        assert!(drained(&mut barrier).is_empty());
        assert_eq!(barrier.len(), 2);

        barrier.insert(0, "a").unwrap();
        let payloads: Vec<_> = barrier.drain_ready().map(|n| n.payload).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }

    #[test]
    fn window_only_holds_unreleased_items() {
        let mut barrier = SequenceBarrier::new();
        for order in 0..1000 {
            barrier.insert(order, "x").unwrap();
            assert_eq!(drained(&mut barrier), vec![order]);
            assert_eq!(barrier.len(), 0);
        }
    }

    #[test]
    fn rejects_stale_and_duplicate_orders() {
        let mut barrier = SequenceBarrier::new();
        barrier.insert(0, "a").unwrap();
        barrier.insert(2, "c").unwrap();
        let _ = drained(&mut barrier);

        assert_eq!(
            barrier.insert(0, "again"),
            Err(SequenceError::Stale { order: 0, next: 1 })
        );
        assert_eq!(
            barrier.insert(2, "again"),
            Err(SequenceError::Duplicate { order: 2 })
        );
    }
}
