use titrate_buffer::{Membership, QueueId};

/// Point-in-time counters of one virtual queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounters {
    pub queue: QueueId,
    /// The bound the active policy currently applies to the queue.
    pub threshold: u64,
    /// Instantaneous occupancy in bytes.
    pub occupancy: u64,
    pub smoothed_occupancy: u64,
    /// Cumulative admitted bytes.
    pub sent_bytes: u64,
    /// Cumulative dropped bytes.
    pub dropped_bytes: u64,
    /// Ledger membership. `None` if the queue holds no ledger entry.
    pub membership: Option<Membership>,
}
