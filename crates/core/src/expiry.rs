use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

struct Entry<K> {
    at: Instant,
    token: u64,
    key: K,
}

impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.token == other.token
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
        self.at.cmp(&other.at).then(self.token.cmp(&other.token))
    }
}

/// Min-heap of deadlines serviced by a single sweeper instead of one timer per key.
///
/// Every `schedule` returns a token. Owners keep the token next to their entry and
/// ignore popped deadlines whose token no longer matches, so rescheduling or
/// cancelling never has to search the heap.
pub struct ExpiryHeap<K> {
    heap: BinaryHeap<Reverse<Entry<K>>>,
    next_token: u64,
}

impl<K> ExpiryHeap<K> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_token: 0 }
    }

    pub fn schedule(&mut self, key: K, at: Instant) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        self.heap.push(Reverse(Entry { at, token, key }));
        token
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    /// Remove and return every `(key, token)` due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(K, u64)> {
        let mut out = Vec::new();
        while let Some(Reverse(e)) = self.heap.peek() {
            if e.at > now {
                break;
            }
            if let Some(Reverse(e)) = self.heap.pop() {
                out.push((e.key, e.token));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<K> Default for ExpiryHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}
