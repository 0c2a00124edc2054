//! Bounded set of message ids already evaluated by the poll loop.

use std::collections::{HashSet, VecDeque};

/// Insertion-ordered set of message ids.
///
/// Once the cache grows past `capacity` it is trimmed to the `keep` most recently
/// added ids. Ids dropped by a trim may be processed again if the mailbox still
/// returns them; History dedup catches the repeat.
#[derive(Debug, Clone)]
pub struct SeenMessageCache {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
    keep: usize,
}

impl SeenMessageCache {
    /// Creates an empty cache. `keep` is clamped to `capacity`.
    #[must_use]
    pub fn new(capacity: usize, keep: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
            keep: keep.min(capacity),
        }
    }

    /// Records `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());

        if self.order.len() > self.capacity {
            let excess = self.order.len() - self.keep;
            for evicted in self.order.drain(..excess) {
                self.members.remove(&evicted);
            }
        }
        true
    }

    /// Returns `true` if `id` has been recorded and not yet trimmed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Removes `id` so the next tick evaluates it again.
    pub fn forget(&mut self, id: &str) {
        if self.members.remove(id) {
            self.order.retain(|seen| seen != id);
        }
    }

    /// Removes every id.
    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    /// Number of ids currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no ids are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
