use rustc_hash::FxHashMap;
use titrate_common::Timestamp;

use crate::QueueId;

/// Whether a queue is still holding its initial burst credit or is being actively probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Membership {
    /// Holding the start credit while the controller decides whether the traffic is transient.
    #[default]
    Reserved,
    /// Carrying sustained traffic; the threshold is driven by the probe.
    Settled,
}

/// The ledger's view of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub threshold: u64,
    /// Set on every successful threshold change.
    pub last_changed: Option<Timestamp>,
    pub membership: Membership,
}

/// Result of a threshold change request after arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThresholdChange {
    pub previous: u64,
    pub current: u64,
}

impl ThresholdChange {
    pub const fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// The signed delta that was actually applied.
    pub fn applied(&self) -> i64 {
        let up = i64::try_from(self.current.saturating_sub(self.previous)).unwrap_or(i64::MAX);
        let down = i64::try_from(self.previous.saturating_sub(self.current)).unwrap_or(i64::MAX);
        up - down
    }
}

/// Per-queue admission thresholds, with a running total so arbitration is O(1).
///
/// Queues without an entry have a threshold of zero. The ledger never checks capacity itself;
/// [`BufferPool`](crate::BufferPool) arbitrates every write.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    entries: FxHashMap<QueueId, LedgerEntry>,
    total: u64,
}

impl AllocationLedger {
    pub fn entry(&self, queue: QueueId) -> Option<&LedgerEntry> {
        self.entries.get(&queue)
    }

    pub fn threshold(&self, queue: QueueId) -> u64 {
        self.entries.get(&queue).map_or(0, |e| e.threshold)
    }

    pub fn membership(&self, queue: QueueId) -> Option<Membership> {
        self.entries.get(&queue).map(|e| e.membership)
    }

    pub fn contains(&self, queue: QueueId) -> bool {
        self.entries.contains_key(&queue)
    }

    /// Sum of all thresholds.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueueId, &LedgerEntry)> {
        self.entries.iter().map(|(q, e)| (*q, e))
    }

    /// Inserts a zero-threshold entry if there is none. Returns `true` if it was inserted.
    pub(crate) fn open(&mut self, queue: QueueId) -> bool {
        if self.entries.contains_key(&queue) {
            return false;
        }

        self.entries.insert(queue, LedgerEntry {
            threshold: 0,
            last_changed: None,
            membership: Membership::Reserved,
        });
        true
    }

    /// Overwrites the threshold of an existing entry, keeping the total in sync.
    pub(crate) fn write(&mut self, queue: QueueId, threshold: u64, now: Timestamp) {
        if let Some(entry) = self.entries.get_mut(&queue) {
            self.total = self.total - entry.threshold + threshold;
            entry.threshold = threshold;
            entry.last_changed = Some(now);
        }
    }

    pub(crate) fn set_membership(&mut self, queue: QueueId, membership: Membership) -> bool {
        match self.entries.get_mut(&queue) {
            Some(entry) => {
                entry.membership = membership;
                true
            }
            None => false,
        }
    }

    /// Removes the entry and returns its credit to the pool.
    pub(crate) fn remove(&mut self, queue: QueueId) -> Option<LedgerEntry> {
        let entry = self.entries.remove(&queue)?;
        self.total -= entry.threshold;
        Some(entry)
    }
}
