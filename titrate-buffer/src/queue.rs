use std::collections::VecDeque;

use crate::QueueId;

/// How the bounded occupancy history is folded into a smoothed average.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SmoothingMode {
    /// Plain mean of the history.
    #[default]
    Mean,
    /// Mean of the samples that are not above the plain mean.
    BelowMean,
    /// Mean of the samples below `multiple` × the plain mean.
    Outlier { multiple: f64 },
}

/// A bounded history of periodic occupancy samples.
#[derive(Debug, Clone)]
pub struct OccupancySampler {
    mode: SmoothingMode,
    history: VecDeque<u64>,
    capacity: usize,
}

impl OccupancySampler {
    pub fn new(mode: SmoothingMode, capacity: usize) -> Self {
        Self { mode, history: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    /// Pushes a sample, evicting the oldest one once the history is full.
    pub fn sample(&mut self, bytes: u64) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(bytes);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The smoothed average. Zero with no samples. Falls back to the plain mean when the mode's
    /// filter excludes every sample.
    pub fn average(&self) -> u64 {
        let Some(mean) = mean(self.history.iter().copied()) else {
            return 0;
        };

        let filtered = match self.mode {
            SmoothingMode::Mean => None,
            SmoothingMode::BelowMean => mean_of(&self.history, |s| s <= mean),
            SmoothingMode::Outlier { multiple } => {
                let cutoff = mean as f64 * multiple;
                mean_of(&self.history, |s| (s as f64) < cutoff)
            }
        };

        filtered.unwrap_or(mean)
    }
}

fn mean(samples: impl Iterator<Item = u64>) -> Option<u64> {
    let (sum, count) = samples.fold((0u128, 0u128), |(sum, n), s| (sum + s as u128, n + 1));
    (count > 0).then(|| (sum / count) as u64)
}

fn mean_of(history: &VecDeque<u64>, keep: impl Fn(u64) -> bool) -> Option<u64> {
    mean(history.iter().copied().filter(|s| keep(*s)))
}

/// A virtual queue carved out of the shared buffer.
///
/// Queues are created lazily on their first packet and never destroyed, so their cumulative
/// counters survive flow ends.
#[derive(Debug, Clone)]
pub struct VirtualQueue {
    id: QueueId,
    len: u64,
    sent_bytes: u64,
    dropped_bytes: u64,
    dequeued_bytes: u64,
    sampler: OccupancySampler,
}

impl VirtualQueue {
    pub fn new(id: QueueId, sampler: OccupancySampler) -> Self {
        Self { id, len: 0, sent_bytes: 0, dropped_bytes: 0, dequeued_bytes: 0, sampler }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Instantaneous occupancy in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cumulative admitted bytes.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    /// Cumulative dropped bytes.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Cumulative bytes that left the queue.
    pub fn dequeued_bytes(&self) -> u64 {
        self.dequeued_bytes
    }

    pub fn smoothed_len(&self) -> u64 {
        self.sampler.average()
    }

    pub fn sampler(&self) -> &OccupancySampler {
        &self.sampler
    }

    pub fn enqueue(&mut self, size: u64) {
        self.len += size;
        self.sent_bytes += size;
    }

    /// Removes up to `size` bytes and returns how many actually left.
    pub fn dequeue(&mut self, size: u64) -> u64 {
        let taken = size.min(self.len);
        self.len -= taken;
        self.dequeued_bytes += taken;
        taken
    }

    pub fn record_drop(&mut self, size: u64) {
        self.dropped_bytes += size;
    }

    /// Feeds the current occupancy into the smoothing history.
    pub fn sample(&mut self) {
        self.sampler.sample(self.len);
    }
}
