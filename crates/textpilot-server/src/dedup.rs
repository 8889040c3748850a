use std::collections::{HashSet, VecDeque};

use textpilot_shared::MessageId;

/// The last `capacity` message ids the broker has fanned out.
///
/// Eviction is FIFO: once full, remembering a new id forgets the oldest one.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Remember `id`. Returns `false` if it is already in the window.
    pub fn insert(&mut self, id: &MessageId) -> bool {
        if self.seen.contains(id) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.order.push_back(id.clone());
        self.seen.insert(id.clone());
        true
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
