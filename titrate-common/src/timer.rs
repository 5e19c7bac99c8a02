use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    hash::Hash,
};

use rustc_hash::FxHashMap;

use crate::Timestamp;

/// A collection of keyed, one-shot timers on the virtual timeline.
///
/// At most one timer is live per key. Re-arming a key supersedes its previous deadline without
/// touching the heap: the old entry stays behind as a tombstone and is skipped when it surfaces.
/// Timers with equal deadlines fire in the order they were armed, so replaying the same event
/// sequence always yields the same firing order.
#[derive(Debug)]
pub struct TimerQueue<K> {
    /// Live timers, keyed to the sequence number and deadline of their current heap entry.
    live: FxHashMap<K, (u64, Timestamp)>,
    heap: BinaryHeap<Reverse<Entry<K>>>,
    seq: u64,
}

#[derive(Debug)]
struct Entry<K> {
    at: Timestamp,
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
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self { live: FxHashMap::default(), heap: BinaryHeap::new(), seq: 0 }
    }
}

impl<K> TimerQueue<K> {
    /// Create an empty `TimerQueue`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns whether there are no live timers.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<K> TimerQueue<K>
where
    K: Eq + Hash + Clone,
{
    /// Arms a timer for `key` at `at` ONLY IF there is not already a live timer for that key.
    ///
    /// Returns `true` if the timer was armed.
    pub fn schedule(&mut self, key: K, at: Timestamp) -> bool {
        if self.live.contains_key(&key) {
            return false;
        }

        self.push(key, at);
        true
    }

    /// Arms a timer for `key` at `at`, superseding any live timer for the same key.
    pub fn reschedule(&mut self, key: K, at: Timestamp) {
        self.push(key, at);
    }

    /// Disarms the timer for `key`. Returns `true` if there was one.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.live.remove(key).is_some()
    }

    /// Returns the earliest live deadline, discarding superseded entries on the way.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.drop_stale();
        self.heap.peek().map(|Reverse(entry)| entry.at)
    }

    /// Removes and returns the earliest live timer if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<(Timestamp, K)> {
        self.drop_stale();

        match self.heap.peek() {
            Some(Reverse(entry)) if entry.at <= now => {}
            _ => return None,
        }

        let Reverse(entry) = self.heap.pop()?;
        self.live.remove(&entry.key);
        Some((entry.at, entry.key))
    }

    fn push(&mut self, key: K, at: Timestamp) {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        self.live.insert(key.clone(), (seq, at));
        self.heap.push(Reverse(Entry { at, seq, key }));
    }

    /// Pops heap entries whose key has since been re-armed or cancelled.
    fn drop_stale(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            match self.live.get(&entry.key) {
                Some((seq, _)) if *seq == entry.seq => return,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}
