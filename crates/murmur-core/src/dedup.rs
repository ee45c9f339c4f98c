//! Known-message-id set.
//!
//! Tracks every broadcast id this node has originated or fully processed.
//! Check and mark happen under one lock so two concurrent deliveries of
//! the same broadcast cannot both be treated as novel.

use crate::id::MessageId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
struct Known {
    ids: HashSet<MessageId>,
    /// Insertion order, only maintained when a capacity is set.
    order: VecDeque<MessageId>,
}

/// Delivery deduplicator.
#[derive(Debug, Default)]
pub struct Deduplicator {
    known: Mutex<Known>,
    capacity: Option<usize>,
}

impl Deduplicator {
    /// Unbounded deduplicator; ids are kept for the process lifetime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduplicator that forgets its oldest ids beyond `capacity`.
    ///
    /// A forgotten id that is delivered again is treated as novel, so the
    /// window must outlast the longest expected retry horizon.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            known: Mutex::new(Known::default()),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn is_known(&self, id: &MessageId) -> bool {
        self.known.lock().ids.contains(id)
    }

    pub fn mark_known(&self, id: MessageId) {
        let mut known = self.known.lock();
        self.insert(&mut known, id);
    }

    /// Mark `id` as known, returning `true` only if it was not known before.
    pub fn check_and_mark(&self, id: &MessageId) -> bool {
        let mut known = self.known.lock();
        if known.ids.contains(id) {
            return false;
        }
        self.insert(&mut known, *id);
        true
    }

    pub fn len(&self) -> usize {
        self.known.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.lock().ids.is_empty()
    }

    fn insert(&self, known: &mut Known, id: MessageId) {
        if !known.ids.insert(id) {
            return;
        }
        if let Some(capacity) = self.capacity {
            known.order.push_back(id);
            while known.order.len() > capacity {
                if let Some(oldest) = known.order.pop_front() {
                    known.ids.remove(&oldest);
                }
            }
        }
    }
}
