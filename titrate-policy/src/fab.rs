use std::time::Duration;

use rustc_hash::FxHashMap;
use titrate_buffer::{BufferPool, FlowId, QueueId};
use titrate_common::{constants::MTU, Timestamp};
use tracing::trace;

use crate::{
    check_fit, scaled, AdmissionContext, AdmissionPolicy, Alphas, PolicyKind, Verdict,
};

#[derive(Debug, Clone)]
pub struct FabOptions {
    /// A flow idle for longer than this starts counting from zero again.
    pub window: Duration,
    /// Flows that sent fewer bytes than this within the window are privileged.
    pub threshold_bytes: u64,
    /// Alpha applied to privileged flows.
    pub privileged_alpha: f64,
}

impl Default for FabOptions {
    fn default() -> Self {
        Self { window: Duration::from_millis(5), threshold_bytes: 15 * MTU, privileged_alpha: 1024.0 }
    }
}

impl FabOptions {
    /// Sets the flow idle window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the byte count under which a flow is privileged.
    pub fn with_threshold_bytes(mut self, bytes: u64) -> Self {
        self.threshold_bytes = bytes;
        self
    }

    /// Sets the alpha of privileged flows.
    pub fn with_privileged_alpha(mut self, alpha: f64) -> Self {
        self.privileged_alpha = alpha;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct FlowBytes {
    bytes: u64,
    last_seen: Timestamp,
}

/// Flow-aware buffer: DT, except that flows which sent little in the last window get a much
/// larger alpha.
#[derive(Debug)]
pub struct FlowAwareBuffer {
    alphas: Alphas,
    options: FabOptions,
    flows: FxHashMap<FlowId, FlowBytes>,
}

impl FlowAwareBuffer {
    pub fn new(alphas: Alphas, options: FabOptions) -> Self {
        Self { alphas, options, flows: FxHashMap::default() }
    }

    /// Counts `size` bytes for `flow` and returns the flow's byte count in the current window.
    fn account(&mut self, flow: FlowId, size: u64, now: Timestamp) -> u64 {
        let window = self.options.window;
        let entry = self.flows.entry(flow).or_insert(FlowBytes { bytes: 0, last_seen: now });

        if now.saturating_duration_since(entry.last_seen) > window {
            entry.bytes = 0;
        }

        entry.bytes += size;
        entry.last_seen = now;
        entry.bytes
    }

    pub fn tracked_flows(&self) -> usize {
        self.flows.len()
    }
}

impl AdmissionPolicy for FlowAwareBuffer {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Fab
    }

    fn evaluate(&mut self, ctx: &AdmissionContext<'_>) -> Verdict {
        let sent = self.account(ctx.flow, ctx.size, ctx.now);
        let privileged = sent < self.options.threshold_bytes;
        let alpha =
            if privileged { self.options.privileged_alpha } else { self.alphas.get(ctx.priority) };

        trace!(flow = %ctx.flow, sent, privileged, "fab flow accounting");

        let remaining = ctx.pool.remaining();
        Verdict::from_check(
            ctx.queue,
            check_fit(ctx.queue_len(), ctx.size, scaled(alpha, remaining), remaining),
        )
    }

    fn threshold(&self, queue: QueueId, pool: &BufferPool) -> u64 {
        scaled(self.alphas.get(pool.layout().priority_of(queue)), pool.remaining())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.options.window)
    }

    /// Forgets flows that have been idle for longer than the window.
    fn on_tick(&mut self, _pool: &BufferPool, now: Timestamp) {
        let window = self.options.window;
        self.flows.retain(|_, f| now.saturating_duration_since(f.last_seen) <= window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils, DropReason};

    fn fab() -> FlowAwareBuffer {
        let options = FabOptions::default().with_threshold_bytes(3_000).with_privileged_alpha(8.0);
        FlowAwareBuffer::new(Alphas::new(vec![0.5], 1).unwrap(), options)
    }

    #[test]
    fn new_flows_get_privileged_alpha() {
        let mut pool = test_utils::pool(10_000, 1, 1);
        test_utils::fill(&mut pool, 0, 0, 4_000);
        let mut fab = fab();

        // remaining 6000: regular bound 3000, privileged bound 48000
        let ctx = AdmissionContext::new(&pool, 0, 0, FlowId(1), 1_500, Timestamp::ZERO);
        assert!(fab.evaluate(&ctx).is_admit());

        // Second packet brings the flow to the byte threshold.
        let ctx = AdmissionContext::new(&pool, 0, 0, FlowId(1), 1_500, Timestamp::from_micros(1));
        assert_eq!(fab.evaluate(&ctx), Verdict::Drop {
            reason: DropReason::ThresholdExceeded,
            adjust: false
        });

        // A different flow is still privileged.
        let ctx = AdmissionContext::new(&pool, 0, 0, FlowId(2), 1_500, Timestamp::from_micros(2));
        assert!(fab.evaluate(&ctx).is_admit());
    }

    #[test]
    fn idle_flows_reset_and_are_pruned() {
        let pool = test_utils::pool(10_000, 1, 1);
        let mut fab = fab();
        let window = fab.options.window;

        for i in 0..3 {
            let ctx = AdmissionContext::new(&pool, 0, 0, FlowId(1), 1_500, Timestamp::from_micros(i));
            fab.evaluate(&ctx);
        }
        assert_eq!(fab.account(FlowId(1), 0, Timestamp::from_micros(3)), 4_500);

        let later = Timestamp::from_micros(3) + window + Duration::from_micros(1);
        assert_eq!(fab.account(FlowId(1), 100, later), 100);

        fab.on_tick(&pool, later + window + Duration::from_micros(1));
        assert_eq!(fab.tracked_flows(), 0);
    }
}
