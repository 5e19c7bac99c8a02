use titrate_buffer::{
    BufferPool, FlowId, MonitoringWindow, QueueId, QueueLayout, ThresholdChange, VirtualQueue,
};
use titrate_common::{Timestamp, TimerQueue};
use titrate_policy::{
    ActiveBufferManagement, AdaptiveAdmission, AdmissionContext, AdmissionPolicy,
    CompleteSharing, ConfigError, DropReason, DynamicThreshold, FlowAwareBuffer,
    IntelligentBuffer, PolicyKind, Verdict,
};
use tracing::{debug, trace, warn};

use crate::{AdaptiveProbe, NodeOptions, QueueCounters};

/// A packet offered to the node. Only metadata: the payload never reaches the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub port: u32,
    pub priority: u32,
    pub flow: FlowId,
    pub size: u64,
}

impl Arrival {
    pub const fn new(port: u32, priority: u32, flow: FlowId, size: u64) -> Self {
        Self { port, priority, flow, size }
    }
}

/// The per-packet result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// The queue the packet was admitted into, or the one it was addressed to if dropped.
    pub queue: QueueId,
    pub admit: bool,
    pub reason: Option<DropReason>,
}

impl AdmissionDecision {
    fn admitted(queue: QueueId) -> Self {
        Self { queue, admit: true, reason: None }
    }

    fn dropped(queue: QueueId, reason: DropReason) -> Self {
        Self { queue, admit: false, reason: Some(reason) }
    }
}

/// Timers the controller keeps on its virtual timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    Probe(QueueId),
    Settle(QueueId),
    PolicyTick,
    Sample,
}

/// The node's admission engine.
///
/// Owns the [`BufferPool`] and the configured policy, and processes arrivals, departures and
/// its own timers strictly in timestamp order. Timers due at the same instant as an event fire
/// before it. Nothing here blocks or spawns: time only moves when a caller passes a later
/// timestamp, which makes every run reproducible.
#[derive(Debug)]
pub struct AdmissionController {
    options: NodeOptions,
    pool: BufferPool,
    policy: Box<dyn AdmissionPolicy>,
    /// Present under the adaptive policy only.
    probe: Option<AdaptiveProbe>,
    timers: TimerQueue<TimerKey>,
    now: Timestamp,
}

impl AdmissionController {
    /// Validates `options` and builds a controller whose timeline starts at zero.
    pub fn new(options: NodeOptions) -> Result<Self, ConfigError> {
        options.validate()?;

        let pool = BufferPool::new(options.capacity, options.layout)
            .with_smoothing(options.smoothing.mode, options.smoothing.history);
        let policy = build_policy(&options)?;
        let probe = (options.policy == PolicyKind::Adaptive)
            .then(|| AdaptiveProbe::new(options.probe.clone()));

        let mut timers = TimerQueue::new();
        if let Some(interval) = policy.tick_interval() {
            timers.schedule(TimerKey::PolicyTick, Timestamp::ZERO + interval);
        }
        timers.schedule(TimerKey::Sample, Timestamp::ZERO + options.smoothing.sample_interval);

        debug!(
            policy = %options.policy,
            capacity = options.capacity,
            ports = options.layout.num_ports(),
            priorities = options.layout.num_priorities(),
            "admission controller ready"
        );

        Ok(Self { options, pool, policy, probe, timers, now: Timestamp::ZERO })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn layout(&self) -> &QueueLayout {
        self.pool.layout()
    }

    pub fn policy_kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    pub fn probe(&self) -> Option<&AdaptiveProbe> {
        self.probe.as_ref()
    }

    /// The latest timestamp the controller has processed.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// The earliest armed timer, if any.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Fires every timer due at or before `now`, in deadline order.
    pub fn advance(&mut self, now: Timestamp) {
        if now < self.now {
            warn!(now = %now, latest = %self.now, "timestamp went backwards, clamping");
        }
        let now = now.max(self.now);

        while let Some((at, key)) = self.timers.pop_due(now) {
            self.now = at;
            self.on_timer(key, at);
        }

        self.now = now;
    }

    fn on_timer(&mut self, key: TimerKey, at: Timestamp) {
        match key {
            TimerKey::PolicyTick => {
                self.policy.on_tick(&self.pool, at);
                if let Some(interval) = self.policy.tick_interval() {
                    self.timers.reschedule(TimerKey::PolicyTick, at + interval);
                }
            }
            TimerKey::Sample => {
                self.pool.sample_occupancy();
                self.timers
                    .reschedule(TimerKey::Sample, at + self.options.smoothing.sample_interval);
            }
            TimerKey::Settle(queue) => {
                if let Some(probe) = self.probe.as_mut() {
                    probe.on_settle_timer(queue, at, &mut self.pool, &mut self.timers);
                }
            }
            TimerKey::Probe(queue) => {
                if let Some(probe) = self.probe.as_mut() {
                    probe.on_probe_timer(queue, at, &mut self.pool, &mut self.timers);
                }
            }
        }
    }

    /// Decides on one arriving packet and applies the outcome.
    pub fn on_packet(&mut self, arrival: Arrival, now: Timestamp) -> AdmissionDecision {
        self.advance(now);
        let now = self.now;

        let layout = *self.pool.layout();
        let priority = layout.clamp_priority(arrival.priority);
        let queue = layout.queue_id(arrival.port, priority);
        self.pool.queue_or_insert(queue);
        let control = self.options.control_priority == Some(priority);

        if let Some(probe) = self.probe.as_mut().filter(|_| !control) {
            if !self.pool.ledger().contains(queue) {
                self.pool.open_ledger(queue, self.options.probe.start_credit, now);
            }
            probe.open(queue, now, self.pool.queue_len(queue), &mut self.timers);
            probe.on_offered(queue, arrival.size, now, &self.pool, &mut self.timers);
        }

        let verdict = if control {
            if self.pool.remaining() >= arrival.size {
                Verdict::Admit { into: queue }
            } else {
                Verdict::Drop { reason: DropReason::CapacityExceeded, adjust: false }
            }
        } else {
            let ctx = AdmissionContext::new(
                &self.pool,
                arrival.port,
                priority,
                arrival.flow,
                arrival.size,
                now,
            );
            self.policy.evaluate(&ctx)
        };

        let decision = match verdict {
            Verdict::Admit { into } => {
                if self.pool.reserve(arrival.size, layout.priority_of(into)) {
                    let len = {
                        let target = self.pool.queue_or_insert(into);
                        target.enqueue(arrival.size);
                        target.len()
                    };
                    if let Some(window) = self.window_mut(into) {
                        window.on_arrival(now);
                        window.record_sent(arrival.size);
                        window.observe_occupancy(len, now);
                    }
                    AdmissionDecision::admitted(into)
                } else {
                    self.on_drop(queue, arrival.size, DropReason::CapacityExceeded, true, now)
                }
            }
            Verdict::Drop { reason, adjust } => {
                self.on_drop(queue, arrival.size, reason, adjust, now)
            }
        };

        trace!(
            queue = %decision.queue,
            flow = %arrival.flow,
            size = arrival.size,
            admit = decision.admit,
            reason = ?decision.reason,
            "admission decision"
        );

        decision
    }

    fn on_drop(
        &mut self,
        queue: QueueId,
        size: u64,
        reason: DropReason,
        adjust: bool,
        now: Timestamp,
    ) -> AdmissionDecision {
        let len = self.pool.queue_mut(queue).map_or(0, |q| {
            q.record_drop(size);
            q.len()
        });

        if let Some(window) = self.window_mut(queue) {
            window.on_arrival(now);
            window.record_drop(size);
            window.observe_occupancy(len, now);
            if len == 0 {
                window.on_empty(now);
            }
        }

        if adjust {
            if let Some(probe) = self.probe.as_mut() {
                probe.on_drop(queue, now, &self.pool, &mut self.timers);
            }
        }

        AdmissionDecision::dropped(queue, reason)
    }

    /// `size` bytes left `queue`. Returns how many bytes were actually released.
    pub fn on_dequeue(&mut self, queue: QueueId, size: u64, now: Timestamp) -> u64 {
        self.advance(now);
        let now = self.now;

        let priority = self.pool.layout().priority_of(queue);
        let Some((taken, len)) = self.pool.queue_mut(queue).map(|q| (q.dequeue(size), q.len()))
        else {
            return 0;
        };
        self.pool.release(taken, priority);

        if let Some(window) = self.window_mut(queue) {
            window.observe_occupancy(len, now);
            if len == 0 {
                window.on_empty(now);
            }
        }

        taken
    }

    /// Forces `queue`'s threshold to `bytes`. Growth is still limited by the capacity headroom.
    ///
    /// Only the adaptive policy reads thresholds from the ledger; the other policies derive
    /// their bound from the pool state and ignore overrides.
    pub fn override_threshold(
        &mut self,
        queue: QueueId,
        bytes: u64,
        now: Timestamp,
    ) -> ThresholdChange {
        self.advance(now);
        let now = self.now;

        let change = self.pool.set_threshold(queue, bytes, now);
        let occupancy = self.pool.queue_len(queue);
        if let Some(probe) = self.probe.as_mut() {
            if !probe.open(queue, now, occupancy, &mut self.timers) {
                probe.on_threshold_change(queue, now, occupancy);
            }
        }

        debug!(queue = %queue, previous = change.previous, current = change.current, "threshold override");
        change
    }

    /// The flow owning `queue` ended: its threshold drops to zero, its probe stops and its
    /// timers are disarmed. The next packet re-opens the queue with the start credit. Returns
    /// `false` if there was nothing to reset.
    pub fn end_flow(&mut self, queue: QueueId, now: Timestamp) -> bool {
        self.advance(now);

        self.timers.cancel(&TimerKey::Probe(queue));
        self.timers.cancel(&TimerKey::Settle(queue));
        let freed = self.pool.retire(queue);
        let forgotten = self.probe.as_mut().is_some_and(|p| p.forget(queue));
        freed.is_some() || forgotten
    }

    pub fn counters(&self, queue: QueueId) -> QueueCounters {
        let q = self.pool.queue(queue);
        QueueCounters {
            queue,
            threshold: self.policy.threshold(queue, &self.pool),
            occupancy: q.map_or(0, VirtualQueue::len),
            smoothed_occupancy: q.map_or(0, VirtualQueue::smoothed_len),
            sent_bytes: q.map_or(0, VirtualQueue::sent_bytes),
            dropped_bytes: q.map_or(0, VirtualQueue::dropped_bytes),
            membership: self.pool.ledger().membership(queue),
        }
    }

    fn window_mut(&mut self, queue: QueueId) -> Option<&mut MonitoringWindow> {
        self.probe.as_mut().and_then(|p| p.window_mut(queue))
    }
}

fn build_policy(options: &NodeOptions) -> Result<Box<dyn AdmissionPolicy>, ConfigError> {
    let priorities = options.layout.num_priorities();
    let policy: Box<dyn AdmissionPolicy> = match options.policy {
        PolicyKind::Dt => Box::new(DynamicThreshold::new(options.alphas()?)),
        PolicyKind::Fab => Box::new(FlowAwareBuffer::new(options.alphas()?, options.fab.clone())),
        PolicyKind::Abm => Box::new(ActiveBufferManagement::new(
            options.alphas()?,
            options.abm.clone(),
            priorities,
        )),
        PolicyKind::Cs => Box::new(CompleteSharing),
        PolicyKind::Ib => Box::new(IntelligentBuffer::new(options.alphas()?, options.ib.clone())),
        PolicyKind::Adaptive => Box::new(AdaptiveAdmission::new(options.adaptive.clone())),
    };
    Ok(policy)
}
