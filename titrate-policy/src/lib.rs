//! Per-packet admission policies for a shared buffer.
//!
//! Every policy reduces to the same structural test: a packet of `size` bytes is admitted into a
//! queue holding `len` bytes iff `len + size <= max_size` and the pool still has `size` bytes
//! left. Policies differ only in how they derive `max_size`.

use std::{fmt::Debug, time::Duration};

use titrate_buffer::{BufferPool, FlowId, QueueId};
use titrate_common::Timestamp;

mod abm;
mod adaptive;
mod cs;
mod dt;
mod error;
mod fab;
mod ib;
mod kind;

pub use abm::{AbmOptions, ActiveBufferManagement};
pub use adaptive::{AdaptiveAdmission, AdaptiveOptions};
pub use cs::CompleteSharing;
pub use dt::{Alphas, DynamicThreshold};
pub use error::{ConfigError, DropReason};
pub use fab::{FabOptions, FlowAwareBuffer};
pub use ib::{IbOptions, IntelligentBuffer};
pub use kind::PolicyKind;

/// Everything a policy may look at when deciding on one packet.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext<'a> {
    /// The queue the packet is addressed to.
    pub queue: QueueId,
    pub port: u32,
    /// Priority class, already clamped to the layout.
    pub priority: u32,
    pub flow: FlowId,
    pub size: u64,
    pub now: Timestamp,
    pub pool: &'a BufferPool,
}

impl<'a> AdmissionContext<'a> {
    pub fn new(
        pool: &'a BufferPool,
        port: u32,
        priority: u32,
        flow: FlowId,
        size: u64,
        now: Timestamp,
    ) -> Self {
        let layout = pool.layout();
        let port = layout.clamp_port(port);
        let priority = layout.clamp_priority(priority);
        Self { queue: layout.queue_id(port, priority), port, priority, flow, size, now, pool }
    }

    /// Instantaneous occupancy of the addressed queue.
    pub fn queue_len(&self) -> u64 {
        self.pool.queue_len(self.queue)
    }
}

/// The outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Admit into `into`, which is the addressed queue unless the policy redirected the packet.
    Admit { into: QueueId },
    /// Drop. `adjust` asks the threshold controller to react to the drop.
    Drop { reason: DropReason, adjust: bool },
}

impl Verdict {
    pub const fn is_admit(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }

    fn from_check(queue: QueueId, check: Result<(), DropReason>) -> Self {
        match check {
            Ok(()) => Self::Admit { into: queue },
            Err(reason) => Self::Drop { reason, adjust: false },
        }
    }
}

/// An admission strategy. One instance serves every queue of a node.
pub trait AdmissionPolicy: Debug + Send {
    fn kind(&self) -> PolicyKind;

    /// Decides on a single arriving packet. Must not assume the packet will actually be
    /// enqueued: the pool reservation happens afterwards and can still fail.
    fn evaluate(&mut self, ctx: &AdmissionContext<'_>) -> Verdict;

    /// The bound the policy currently applies to `queue`, for inspection.
    fn threshold(&self, queue: QueueId, pool: &BufferPool) -> u64;

    /// How often [`AdmissionPolicy::on_tick`] should run, if at all.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic maintenance: rate estimates, flow table pruning.
    fn on_tick(&mut self, _pool: &BufferPool, _now: Timestamp) {}
}

/// The structural admission test. Capacity is checked first, so a packet that fails both
/// conditions is reported as [`DropReason::CapacityExceeded`].
pub fn check_fit(len: u64, size: u64, max_size: u64, remaining: u64) -> Result<(), DropReason> {
    if remaining < size {
        return Err(DropReason::CapacityExceeded);
    }

    if len.saturating_add(size) > max_size {
        return Err(DropReason::ThresholdExceeded);
    }

    Ok(())
}

/// `alpha × bytes`, saturating.
fn scaled(alpha: f64, bytes: u64) -> u64 {
    (alpha * bytes as f64) as u64
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_checked_before_threshold() {
        assert_eq!(check_fit(3_000, 1, 3_000, 0), Err(DropReason::CapacityExceeded));
        assert_eq!(check_fit(7_600, 1_500, 9_000, 5_000), Err(DropReason::ThresholdExceeded));
        assert_eq!(check_fit(7_500, 1_500, 9_000, 1_500), Ok(()));
    }
}
