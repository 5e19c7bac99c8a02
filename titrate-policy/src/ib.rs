use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;
use titrate_buffer::{BufferPool, FlowId, QueueId};
use titrate_common::{constants::KiB, Timestamp};
use tracing::trace;

use crate::{
    AdmissionContext, AdmissionPolicy, Alphas, DropReason, DynamicThreshold, PolicyKind, Verdict,
};

#[derive(Debug, Clone)]
pub struct IbOptions {
    /// Period of the fair-share update.
    pub afd_window: Duration,
    /// Queue length the fair-share controller steers towards.
    pub reference_bytes: u64,
    pub initial_fair_share: f64,
    /// Proportional gain.
    pub a1: f64,
    /// Derivative gain.
    pub a2: f64,
    /// A flow idle for longer than this is counted from zero again.
    pub short_flow_window: Duration,
    /// Flows with fewer packets than this within the window are short.
    pub short_flow_packets: u64,
    /// Send short flows to priority 0 of the same port.
    pub redirect_short_flows: bool,
    /// Early drops only happen while the queue is longer than this.
    pub early_drop_floor: u64,
    /// Seed for the early-drop coin flips.
    pub seed: u64,
}

impl Default for IbOptions {
    fn default() -> Self {
        Self {
            afd_window: Duration::from_micros(50),
            reference_bytes: 15_000,
            initial_fair_share: 4_000_000.0,
            a1: 1.8,
            a2: 1.7,
            short_flow_window: Duration::from_millis(5),
            short_flow_packets: 15,
            redirect_short_flows: true,
            early_drop_floor: 150 * KiB,
            seed: 0,
        }
    }
}

impl IbOptions {
    /// Sets the fair-share update window.
    pub fn with_afd_window(mut self, window: Duration) -> Self {
        self.afd_window = window;
        self
    }

    /// Sets the queue length the fair share is steered towards.
    pub fn with_reference_bytes(mut self, bytes: u64) -> Self {
        self.reference_bytes = bytes;
        self
    }

    /// Sets the fair share before the first update.
    pub fn with_initial_fair_share(mut self, share: f64) -> Self {
        self.initial_fair_share = share;
        self
    }

    /// Sets the proportional and derivative gains of the fair-share controller.
    pub fn with_gains(mut self, a1: f64, a2: f64) -> Self {
        self.a1 = a1;
        self.a2 = a2;
        self
    }

    /// Sets what counts as a short flow: fewer than `packets` packets within `window`.
    pub fn with_short_flows(mut self, window: Duration, packets: u64) -> Self {
        self.short_flow_window = window;
        self.short_flow_packets = packets;
        self
    }

    /// Sends short flows to priority 0 of the same port.
    pub fn with_redirect_short_flows(mut self, redirect: bool) -> Self {
        self.redirect_short_flows = redirect;
        self
    }

    /// Sets the queue length early drops start above.
    pub fn with_early_drop_floor(mut self, bytes: u64) -> Self {
        self.early_drop_floor = bytes;
        self
    }

    /// Seeds the early drop generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct FlowPackets {
    packets: u64,
    last_seen: Timestamp,
}

/// Fair-share controller state of one queue.
#[derive(Debug, Clone, Copy)]
struct FairShare {
    target: f64,
    previous_len: u64,
    /// Long-flow bytes that arrived in the current window.
    arrived: u64,
    /// Long-flow bytes that arrived in the previous window. At least one.
    last_arrived: u64,
}

/// Intelligent buffer.
///
/// Short flows (by packet count) are moved to the port's priority-0 queue and only face the DT
/// bound there. Everything else faces the DT bound plus approximate fair dropping: the queue's
/// fair-share target `M` is driven by a PD controller towards a reference length, and a packet is
/// dropped early with probability `1 - min(15 × arrived, M) / (15 × arrived)` while the queue is
/// above the early-drop floor.
#[derive(Debug)]
pub struct IntelligentBuffer {
    dt: DynamicThreshold,
    options: IbOptions,
    flows: FxHashMap<FlowId, FlowPackets>,
    fairness: FxHashMap<QueueId, FairShare>,
    rng: StdRng,
}

impl IntelligentBuffer {
    pub fn new(alphas: Alphas, options: IbOptions) -> Self {
        let rng = StdRng::seed_from_u64(options.seed);
        Self {
            dt: DynamicThreshold::new(alphas),
            options,
            flows: FxHashMap::default(),
            fairness: FxHashMap::default(),
            rng,
        }
    }

    fn fair_share(&mut self, queue: QueueId) -> &mut FairShare {
        let initial = self.options.initial_fair_share;
        self.fairness.entry(queue).or_insert(FairShare {
            target: initial,
            previous_len: 0,
            arrived: 0,
            last_arrived: 1,
        })
    }

    /// Counts a packet for `flow` and returns the flow's packet count in the current window.
    fn count_packet(&mut self, flow: FlowId, now: Timestamp) -> u64 {
        let window = self.options.short_flow_window;
        let entry = self.flows.entry(flow).or_insert(FlowPackets { packets: 0, last_seen: now });
        if now.saturating_duration_since(entry.last_seen) > window {
            entry.packets = 0;
        }

        entry.packets += 1;
        entry.last_seen = now;
        entry.packets
    }

    /// Current fair-share target of `queue`.
    pub fn fair_share_target(&self, queue: QueueId) -> f64 {
        self.fairness.get(&queue).map_or(self.options.initial_fair_share, |f| f.target)
    }
}

impl AdmissionPolicy for IntelligentBuffer {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Ib
    }

    fn evaluate(&mut self, ctx: &AdmissionContext<'_>) -> Verdict {
        let packets = self.count_packet(ctx.flow, ctx.now);

        if self.options.redirect_short_flows && packets < self.options.short_flow_packets {
            let short_queue = ctx.pool.layout().queue_id(ctx.port, 0);
            trace!(flow = %ctx.flow, packets, queue = %short_queue, "short flow redirected");
            return self.dt.evaluate_for(ctx, short_queue);
        }

        let fair = self.fair_share(ctx.queue);
        fair.arrived += ctx.size;
        let budget = 15.0 * fair.last_arrived as f64;
        let drop_probability = (1.0 - fair.target.min(budget) / budget).max(0.0);

        let verdict = self.dt.evaluate(ctx);
        if verdict.is_admit() && ctx.queue_len() > self.options.early_drop_floor {
            let roll: f64 = self.rng.gen();
            if roll < drop_probability {
                trace!(queue = %ctx.queue, drop_probability, "early drop");
                return Verdict::Drop { reason: DropReason::ThresholdExceeded, adjust: false };
            }
        }

        verdict
    }

    fn threshold(&self, queue: QueueId, pool: &BufferPool) -> u64 {
        self.dt.threshold(queue, pool)
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.options.afd_window)
    }

    /// Rolls the arrival windows, runs the PD update and prunes idle flows.
    fn on_tick(&mut self, pool: &BufferPool, now: Timestamp) {
        let reference = self.options.reference_bytes as f64;
        let (a1, a2) = (self.options.a1, self.options.a2);

        for queue in pool.queues() {
            let len = queue.len();
            let fair = self.fair_share(queue.id());
            fair.last_arrived = fair.arrived.max(1);
            fair.arrived = 0;
            fair.target = (fair.target - a1 * (len as f64 - reference)
                + a2 * (fair.previous_len as f64 - reference))
                .max(0.0);
            fair.previous_len = len;
        }

        let window = self.options.short_flow_window;
        self.flows.retain(|_, f| now.saturating_duration_since(f.last_seen) <= window);
    }
}
