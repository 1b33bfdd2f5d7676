//! Deadline queue with lazy cancellation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Instant;

/// Heap entry; the earliest deadline sorts highest.
#[derive(Debug)]
struct Entry<K> {
    at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<K> Eq for Entry<K> {}

impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Entry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Keys ordered by deadline.
///
/// Cancelling or rescheduling a key leaves its old heap entry in place; the
/// entry is discarded when it reaches the top. Each key has at most one live
/// deadline.
#[derive(Debug)]
pub struct DeadlineQueue<K> {
    heap: BinaryHeap<Entry<K>>,
    live: HashMap<K, u64>,
    next_seq: u64,
}

impl<K> Default for DeadlineQueue<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Clone + Eq + Hash> DeadlineQueue<K> {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` at `at`, replacing any earlier deadline for it.
    pub fn schedule(&mut self, key: K, at: Instant) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.live.insert(key.clone(), seq);
        self.heap.push(Entry { at, seq, key });
    }

    /// Cancel `key`. Returns whether it was scheduled.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.live.remove(key).is_some()
    }

    /// Whether `key` has a live deadline.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.live.contains_key(key)
    }

    /// Remove and return every key due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|top| top.at <= now) {
            let Some(entry) = self.heap.pop() else { break };
            if self.is_live(&entry) {
                self.live.remove(&entry.key);
                due.push(entry.key);
            }
        }
        due
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                return Some(top.at);
            }
            self.heap.pop();
        }
        None
    }

    /// Number of live deadlines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no deadline is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn is_live(&self, entry: &Entry<K>) -> bool {
        self.live.get(&entry.key) == Some(&entry.seq)
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let base = Instant::now();
        let mut q = DeadlineQueue::new();
        q.schedule("c", base + Duration::from_millis(30));
        q.schedule("a", base + Duration::from_millis(10));
        q.schedule("b", base + Duration::from_millis(20));

        assert_eq!(q.next_deadline(), Some(base + Duration::from_millis(10)));
        assert_eq!(q.pop_due(base + Duration::from_millis(25)), vec!["a", "b"]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_due(base + Duration::from_secs(1)), vec!["c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_cancelled_entry_never_fires() {
        let base = Instant::now();
        let mut q = DeadlineQueue::new();
        q.schedule(1, base);
        q.schedule(2, base + Duration::from_millis(5));
        assert!(q.cancel(&1));
        assert!(!q.cancel(&1));

        assert_eq!(q.next_deadline(), Some(base + Duration::from_millis(5)));
        assert_eq!(q.pop_due(base + Duration::from_secs(1)), vec![2]);
    }

    #[test]
    fn test_reschedule_replaces_deadline() {
        let base = Instant::now();
        let mut q = DeadlineQueue::new();
        q.schedule("k", base);
        q.schedule("k", base + Duration::from_secs(10));

        assert!(q.pop_due(base + Duration::from_secs(1)).is_empty());
        assert!(q.contains(&"k"));
        assert_eq!(q.pop_due(base + Duration::from_secs(10)), vec!["k"]);
    }

    #[test]
    fn test_equal_deadlines_fire_in_schedule_order() {
        let at = Instant::now();
        let mut q = DeadlineQueue::new();
        for key in ["x", "y", "z"] {
            q.schedule(key, at);
        }
        assert_eq!(q.pop_due(at), vec!["x", "y", "z"]);
    }
}
