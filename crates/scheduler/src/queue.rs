//! Coalescing render request queue
//!
//! Requests are keyed by [`PageKey`]: at most one live request per key is
//! queued at any time. Requests are popped highest priority first, FIFO
//! within the same priority.

use crate::cancel::RequestShared;
use pageport_cache::PageKey;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// Render priority levels
///
/// Higher values are popped first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderPriority {
    /// Prefetch margin around the visible pages
    Prefetch = 0,

    /// Intersects the viewport
    Visible = 1,

    /// The page under the viewport's focal point
    Focal = 2,
}

/// A queued render request
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub(crate) key: PageKey,
    pub(crate) sequence: u64,
    pub(crate) priority: RenderPriority,
    pub(crate) shared: Arc<RequestShared>,
}

impl PendingRequest {
    pub(crate) fn new(key: PageKey, sequence: u64, priority: RenderPriority) -> Self {
        Self {
            key,
            sequence,
            priority,
            shared: RequestShared::new(),
        }
    }
}

/// Heap slot pointing at a pending request
///
/// Priority upgrades push a second slot for the same request; slots that no
/// longer match the pending entry are skipped when popped.
#[derive(Debug, PartialEq, Eq)]
struct HeapSlot {
    priority: RenderPriority,
    sequence: u64,
    key: PageKey,
}

impl PartialOrd for HeapSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: lower sequence must compare greater
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    heap: BinaryHeap<HeapSlot>,
    pending: HashMap<PageKey, PendingRequest>,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a request, replacing any request already pending for its key
    pub(crate) fn push(&mut self, request: PendingRequest) {
        self.heap.push(HeapSlot {
            priority: request.priority,
            sequence: request.sequence,
            key: request.key,
        });
        self.pending.insert(request.key, request);
        self.compact();
    }

    /// The live request pending for `key`, if any
    pub(crate) fn get(&self, key: &PageKey) -> Option<&PendingRequest> {
        self.pending.get(key)
    }

    /// Raise the priority of a pending request
    ///
    /// Returns `true` if the priority changed. A lower priority never
    /// replaces a higher one.
    pub(crate) fn upgrade(&mut self, key: &PageKey, priority: RenderPriority) -> bool {
        let Some(request) = self.pending.get_mut(key) else {
            return false;
        };
        if priority <= request.priority {
            return false;
        }

        request.priority = priority;
        self.heap.push(HeapSlot {
            priority,
            sequence: request.sequence,
            key: *key,
        });
        true
    }

    /// Pop the highest priority request
    pub(crate) fn pop(&mut self) -> Option<PendingRequest> {
        while let Some(slot) = self.heap.pop() {
            let live = self
                .pending
                .get(&slot.key)
                .is_some_and(|r| r.sequence == slot.sequence && r.priority == slot.priority);
            if live {
                return self.pending.remove(&slot.key);
            }
        }
        None
    }

    /// Remove every request whose key matches `predicate`
    pub(crate) fn remove_if<F>(&mut self, predicate: F) -> Vec<PendingRequest>
    where
        F: Fn(&PageKey) -> bool,
    {
        let doomed: Vec<PageKey> = self
            .pending
            .keys()
            .filter(|key| predicate(key))
            .copied()
            .collect();

        doomed
            .iter()
            .filter_map(|key| self.pending.remove(key))
            .collect()
    }

    /// Remove every request
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.heap.clear();
        self.pending.drain().map(|(_, request)| request).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn keys(&self) -> Vec<PageKey> {
        self.pending.keys().copied().collect()
    }

    /// Rebuild the heap once stale slots dominate it
    fn compact(&mut self) {
        if self.heap.len() <= 2 * self.pending.len() + 16 {
            return;
        }

        self.heap = self
            .pending
            .values()
            .map(|request| HeapSlot {
                priority: request.priority,
                sequence: request.sequence,
                key: request.key,
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageport_cache::Rotation;

    fn key(page_index: usize) -> PageKey {
        PageKey::new(page_index, 1.0, Rotation::Deg0)
    }

    #[test]
    fn test_priority_ordering() {
        let mut queue = RequestQueue::new();
        queue.push(PendingRequest::new(key(3), 1, RenderPriority::Prefetch));
        queue.push(PendingRequest::new(key(1), 2, RenderPriority::Focal));
        queue.push(PendingRequest::new(key(2), 3, RenderPriority::Visible));

        assert_eq!(queue.pop().unwrap().key, key(1));
        assert_eq!(queue.pop().unwrap().key, key(2));
        assert_eq!(queue.pop().unwrap().key, key(3));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = RequestQueue::new();
        for (sequence, page) in [(1, 10), (2, 11), (3, 12)] {
            queue.push(PendingRequest::new(key(page), sequence, RenderPriority::Visible));
        }

        assert_eq!(queue.pop().unwrap().key, key(10));
        assert_eq!(queue.pop().unwrap().key, key(11));
        assert_eq!(queue.pop().unwrap().key, key(12));
    }

    #[test]
    fn test_upgrade_priority() {
        let mut queue = RequestQueue::new();
        queue.push(PendingRequest::new(key(1), 1, RenderPriority::Visible));
        queue.push(PendingRequest::new(key(2), 2, RenderPriority::Prefetch));

        assert!(queue.upgrade(&key(2), RenderPriority::Focal));
        assert!(!queue.upgrade(&key(2), RenderPriority::Prefetch));

        let first = queue.pop().unwrap();
        assert_eq!(first.key, key(2));
        assert_eq!(first.priority, RenderPriority::Focal);
        assert_eq!(queue.pop().unwrap().key, key(1));

        // The stale prefetch slot for key 2 is skipped
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_replaces_pending_key() {
        let mut queue = RequestQueue::new();
        queue.push(PendingRequest::new(key(1), 1, RenderPriority::Visible));
        queue.push(PendingRequest::new(key(1), 2, RenderPriority::Visible));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().sequence, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_remove_if() {
        let mut queue = RequestQueue::new();
        for page in 0..5 {
            queue.push(PendingRequest::new(key(page), page as u64, RenderPriority::Visible));
        }

        assert_eq!(queue.remove_if(|k| *k == key(0)).len(), 1);
        assert!(queue.remove_if(|k| *k == key(0)).is_empty());

        let removed = queue.remove_if(|k| k.page_index >= 3);
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 2);

        let mut remaining: Vec<usize> = queue.keys().iter().map(|k| k.page_index).collect();
        remaining.sort();
        assert_eq!(remaining, vec![1, 2]);

        assert_eq!(queue.pop().unwrap().key, key(1));
        assert_eq!(queue.pop().unwrap().key, key(2));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_drain() {
        let mut queue = RequestQueue::new();
        queue.push(PendingRequest::new(key(1), 1, RenderPriority::Visible));
        queue.push(PendingRequest::new(key(2), 2, RenderPriority::Visible));

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_compaction_keeps_order() {
        let mut queue = RequestQueue::new();
        for round in 0..100u64 {
            queue.push(PendingRequest::new(key(0), round, RenderPriority::Prefetch));
        }
        queue.push(PendingRequest::new(key(1), 100, RenderPriority::Focal));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().key, key(1));
        assert_eq!(queue.pop().unwrap().sequence, 99);
        assert!(queue.pop().is_none());
    }
}
