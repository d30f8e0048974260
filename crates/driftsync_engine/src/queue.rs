//! Bounded offline operation queue.

use driftsync_protocol::Operation;
use std::collections::VecDeque;
use tracing::warn;

/// An order-preserving buffer of operations awaiting transmission.
///
/// Capacity is bounded; when full, `enqueue` evicts the oldest entry before
/// appending, so a long offline period degrades gracefully instead of
/// growing memory unbounded. A dropped operation's effect is only
/// recoverable via the next full-state pull.
///
/// # Invariants
///
/// - FIFO: `drain` returns operations in enqueue order
/// - All methods are synchronous; callers serialize access
pub struct OfflineQueue {
    entries: VecDeque<Operation>,
    capacity: usize,
}

impl OfflineQueue {
    /// Creates a queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    /// Appends an operation to the tail.
    ///
    /// Returns the evicted oldest operation when the queue was full.
    pub fn enqueue(&mut self, operation: Operation) -> Option<Operation> {
        let evicted = if self.entries.len() >= self.capacity {
            let dropped = self.entries.pop_front();
            if let Some(ref op) = dropped {
                warn!(operation_id = op.id, "offline queue full, dropping oldest operation");
            }
            dropped
        } else {
            None
        };

        self.entries.push_back(operation);
        evicted
    }

    /// Removes and returns up to `max_batch` operations from the head.
    pub fn drain(&mut self, max_batch: usize) -> Vec<Operation> {
        let count = max_batch.min(self.entries.len());
        self.entries.drain(..count).collect()
    }

    /// Puts operations back at the head, preserving their order.
    ///
    /// Used when a drained batch could not be submitted. If the queue
    /// overflows, the oldest entries are dropped as in [`enqueue`] and
    /// returned so the caller can release any per-operation tracking.
    ///
    /// [`enqueue`]: OfflineQueue::enqueue
    pub fn reinstate(&mut self, operations: Vec<Operation>) -> Vec<Operation> {
        for op in operations.into_iter().rev() {
            self.entries.push_front(op);
        }
        let mut dropped = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(op) = self.entries.pop_front() {
                warn!(operation_id = op.id, "offline queue full, dropping oldest operation");
                dropped.push(op);
            }
        }
        dropped
    }

    /// Returns the queued operation ids in order, without removing them.
    pub fn ids(&self) -> Vec<u64> {
        self.entries.iter().map(|op| op.id).collect()
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
