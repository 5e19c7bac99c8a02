use titrate_buffer::{BufferPool, Membership, QueueId};
use tracing::trace;

use crate::{check_fit, AdmissionContext, AdmissionPolicy, DropReason, PolicyKind, Verdict};

#[derive(Debug, Clone, Default)]
pub struct AdaptiveOptions {
    /// Bytes of the remaining buffer that settled queues may not use, so that reserved queues
    /// keep room for their bursts.
    pub burst_reserve: u64,
    /// When set, a packet over its threshold is still admitted as long as the smoothed occupancy
    /// has not exceeded the threshold. Queues with no occupancy samples yet are never let through.
    pub smoothed_gate: bool,
}

impl AdaptiveOptions {
    /// Sets the bytes kept free for reserved queues.
    pub fn with_burst_reserve(mut self, bytes: u64) -> Self {
        self.burst_reserve = bytes;
        self
    }

    /// Enables admission on smoothed occupancy.
    pub fn with_smoothed_gate(mut self, enabled: bool) -> Self {
        self.smoothed_gate = enabled;
        self
    }
}

/// Admission rule of the adaptive controller: the structural test against the threshold held
/// in the allocation ledger. The threshold itself is moved by the probe, which is why every
/// drop asks for an adjustment.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveAdmission {
    options: AdaptiveOptions,
}

impl AdaptiveAdmission {
    pub fn new(options: AdaptiveOptions) -> Self {
        Self { options }
    }
}

impl AdmissionPolicy for AdaptiveAdmission {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Adaptive
    }

    fn evaluate(&mut self, ctx: &AdmissionContext<'_>) -> Verdict {
        let entry = ctx.pool.ledger().entry(ctx.queue);
        let threshold = entry.map_or(0, |e| e.threshold);

        let remaining = match entry.map(|e| e.membership) {
            Some(Membership::Settled) => {
                ctx.pool.remaining().saturating_sub(self.options.burst_reserve)
            }
            _ => ctx.pool.remaining(),
        };

        match check_fit(ctx.queue_len(), ctx.size, threshold, remaining) {
            Ok(()) => Verdict::Admit { into: ctx.queue },
            Err(DropReason::ThresholdExceeded) if self.options.smoothed_gate => {
                let smoothed = ctx
                    .pool
                    .queue(ctx.queue)
                    .filter(|q| !q.sampler().is_empty())
                    .map(|q| q.smoothed_len());
                if let Some(smoothed) = smoothed.filter(|s| *s <= threshold) {
                    trace!(queue = %ctx.queue, smoothed, threshold, "admitted on smoothed occupancy");
                    Verdict::Admit { into: ctx.queue }
                } else {
                    Verdict::Drop { reason: DropReason::ThresholdExceeded, adjust: true }
                }
            }
            Err(reason) => Verdict::Drop { reason, adjust: true },
        }
    }

    fn threshold(&self, queue: QueueId, pool: &BufferPool) -> u64 {
        pool.ledger().threshold(queue)
    }
}
