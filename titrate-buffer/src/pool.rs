use rustc_hash::FxHashMap;
use titrate_common::Timestamp;
use tracing::debug;

use crate::{
    AllocationLedger, Membership, OccupancySampler, QueueId, QueueLayout, SmoothingMode,
    ThresholdChange, VirtualQueue,
};

/// Default number of samples kept per queue for the smoothed average.
pub const DEFAULT_SMOOTHING_HISTORY: usize = 500;

/// The single shared buffer.
///
/// Owns the global byte accounting, the virtual queues and the [`AllocationLedger`]. `reserve`
/// and `release` are the only operations that move global capacity; every threshold write goes
/// through the arbitration in [`BufferPool::request_threshold_change`], which keeps the sum of
/// all thresholds at or below capacity.
#[derive(Debug)]
pub struct BufferPool {
    capacity: u64,
    occupied: u64,
    occupied_by_priority: Vec<u64>,
    layout: QueueLayout,
    ledger: AllocationLedger,
    queues: FxHashMap<QueueId, VirtualQueue>,
    smoothing: SmoothingMode,
    smoothing_history: usize,
}

impl BufferPool {
    pub fn new(capacity: u64, layout: QueueLayout) -> Self {
        Self {
            capacity,
            occupied: 0,
            occupied_by_priority: vec![0; layout.num_priorities().max(1) as usize],
            layout,
            ledger: AllocationLedger::default(),
            queues: FxHashMap::default(),
            smoothing: SmoothingMode::default(),
            smoothing_history: DEFAULT_SMOOTHING_HISTORY,
        }
    }

    /// Sets how queues created from now on smooth their occupancy history.
    pub fn with_smoothing(mut self, mode: SmoothingMode, history: usize) -> Self {
        self.smoothing = mode;
        self.smoothing_history = history;
        self
    }

    /// Total buffer size in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes held by all queues.
    pub fn occupied(&self) -> u64 {
        self.occupied
    }

    /// Bytes still free.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.occupied
    }

    /// Bytes held by queues of `priority`.
    pub fn occupied_by_priority(&self, priority: u32) -> u64 {
        self.occupied_by_priority[self.priority_index(priority)]
    }

    pub fn layout(&self) -> &QueueLayout {
        &self.layout
    }

    /// Thresholds granted so far.
    pub fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    /// Moves `size` bytes from remaining to occupied. Returns `false` and leaves the pool
    /// untouched if less than `size` bytes remain.
    pub fn reserve(&mut self, size: u64, priority: u32) -> bool {
        if self.remaining() < size {
            return false;
        }

        let idx = self.priority_index(priority);
        self.occupied += size;
        self.occupied_by_priority[idx] += size;
        true
    }

    /// Returns up to `size` bytes of `priority`'s occupancy to the pool.
    pub fn release(&mut self, size: u64, priority: u32) {
        let idx = self.priority_index(priority);
        let freed = size.min(self.occupied_by_priority[idx]);
        self.occupied_by_priority[idx] -= freed;
        self.occupied -= freed;
    }

    pub fn queue(&self, queue: QueueId) -> Option<&VirtualQueue> {
        self.queues.get(&queue)
    }

    pub fn queue_mut(&mut self, queue: QueueId) -> Option<&mut VirtualQueue> {
        self.queues.get_mut(&queue)
    }

    /// Returns the queue, creating it on first use.
    pub fn queue_or_insert(&mut self, queue: QueueId) -> &mut VirtualQueue {
        let (mode, history) = (self.smoothing, self.smoothing_history);
        self.queues
            .entry(queue)
            .or_insert_with(|| VirtualQueue::new(queue, OccupancySampler::new(mode, history)))
    }

    pub fn queues(&self) -> impl Iterator<Item = &VirtualQueue> {
        self.queues.values()
    }

    /// Instantaneous occupancy of `queue`, zero if it does not exist yet.
    pub fn queue_len(&self, queue: QueueId) -> u64 {
        self.queues.get(&queue).map_or(0, VirtualQueue::len)
    }

    /// Samples the occupancy of every queue into its smoothing history.
    pub fn sample_occupancy(&mut self) {
        self.queues.values_mut().for_each(VirtualQueue::sample);
    }

    /// Opens a ledger entry for `queue` (if it has none) and grants it `credit`, subject to
    /// arbitration. Returns `None` if the entry already existed.
    pub fn open_ledger(
        &mut self,
        queue: QueueId,
        credit: u64,
        now: Timestamp,
    ) -> Option<ThresholdChange> {
        if !self.ledger.open(queue) {
            return None;
        }

        let delta = i64::try_from(credit).unwrap_or(i64::MAX);
        Some(self.request_threshold_change(queue, delta, now))
    }

    /// Arbitrated threshold update.
    ///
    /// A positive `delta` is truncated to the headroom `capacity - Σ thresholds`; a negative one
    /// saturates at zero. The change timestamp is recorded only if the threshold actually moved.
    /// Queues without a ledger entry are left alone.
    pub fn request_threshold_change(
        &mut self,
        queue: QueueId,
        delta: i64,
        now: Timestamp,
    ) -> ThresholdChange {
        let Some(previous) = self.ledger.entry(queue).map(|e| e.threshold) else {
            return ThresholdChange::default();
        };

        let current = if delta >= 0 {
            let headroom = self.capacity.saturating_sub(self.ledger.total());
            previous + delta.unsigned_abs().min(headroom)
        } else {
            previous.saturating_sub(delta.unsigned_abs())
        };

        let change = ThresholdChange { previous, current };
        if change.changed() {
            self.ledger.write(queue, current, now);
            debug!(queue = %queue, previous, current, total = self.ledger.total(), "threshold changed");
        }

        change
    }

    /// Sets `queue`'s threshold to `bytes`, opening its ledger entry if needed. Growth is still
    /// truncated to the available headroom.
    pub fn set_threshold(&mut self, queue: QueueId, bytes: u64, now: Timestamp) -> ThresholdChange {
        self.ledger.open(queue);
        let previous = self.ledger.threshold(queue);
        let delta = if bytes >= previous {
            i64::try_from(bytes - previous).unwrap_or(i64::MAX)
        } else {
            -i64::try_from(previous - bytes).unwrap_or(i64::MAX)
        };

        self.request_threshold_change(queue, delta, now)
    }

    /// Moves `queue` to [`Membership::Settled`]. Returns `false` if it has no ledger entry.
    pub fn settle(&mut self, queue: QueueId) -> bool {
        let settled = self.ledger.set_membership(queue, Membership::Settled);
        if settled {
            debug!(queue = %queue, threshold = self.ledger.threshold(queue), "queue settled");
        }
        settled
    }

    /// Drops `queue`'s ledger entry, returning its credit to the headroom. The queue itself and
    /// its counters stay.
    pub fn retire(&mut self, queue: QueueId) -> Option<u64> {
        let entry = self.ledger.remove(queue)?;
        debug!(queue = %queue, freed = entry.threshold, "queue retired");
        Some(entry.threshold)
    }

    fn priority_index(&self, priority: u32) -> usize {
        (priority as usize).min(self.occupied_by_priority.len() - 1)
    }
}
