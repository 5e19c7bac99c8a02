use std::time::Duration;

use rustc_hash::FxHashMap;
use titrate_buffer::{BufferPool, QueueId};
use titrate_common::Timestamp;
use tracing::trace;

use crate::{check_fit, AdmissionContext, AdmissionPolicy, Alphas, PolicyKind, Verdict};

#[derive(Debug, Clone)]
pub struct AbmOptions {
    /// Occupancy at which a queue counts as fully saturated.
    pub saturation_bytes: u64,
    /// How often the active-queue count and dequeue shares are refreshed.
    pub update_interval: Duration,
}

impl Default for AbmOptions {
    fn default() -> Self {
        Self { saturation_bytes: 20 * 1400, update_interval: Duration::from_micros(30) }
    }
}

impl AbmOptions {
    /// Sets the occupancy at which a queue counts as saturated.
    pub fn with_saturation_bytes(mut self, bytes: u64) -> Self {
        self.saturation_bytes = bytes;
        self
    }

    /// Sets how often active-queue counts and dequeue shares are refreshed.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }
}

/// Active buffer management.
///
/// `max_size = alpha × remaining / active(priority) × share(queue)`, where `active` is the
/// number of saturated queues of the same priority across all ports (each queue contributes
/// `min(1, len / saturation_bytes)`, and the sum is floored at one), and `share` is the queue's
/// fraction of its port's dequeued bytes over the last update interval, clamped to
/// `[1 / priorities, 1]`. Both are refreshed on the tick, so every packet between two ticks sees
/// the same estimate.
#[derive(Debug)]
pub struct ActiveBufferManagement {
    alphas: Alphas,
    options: AbmOptions,
    /// Active-queue estimate per priority.
    active: Vec<f64>,
    share: FxHashMap<QueueId, f64>,
    /// Cumulative dequeued bytes per queue at the last refresh.
    dequeued: FxHashMap<QueueId, u64>,
}

impl ActiveBufferManagement {
    pub fn new(alphas: Alphas, options: AbmOptions, priorities: u32) -> Self {
        Self {
            alphas,
            options,
            active: vec![1.0; priorities.max(1) as usize],
            share: FxHashMap::default(),
            dequeued: FxHashMap::default(),
        }
    }

    fn max_size(&self, queue: QueueId, priority: u32, remaining: u64) -> u64 {
        let active = self.active.get(priority as usize).copied().unwrap_or(1.0);
        let share = self.share.get(&queue).copied().unwrap_or(1.0);
        let max = self.alphas.get(priority) * remaining as f64 / active * share;
        max as u64
    }

    fn saturation(&self, len: u64) -> f64 {
        if self.options.saturation_bytes == 0 {
            return 1.0;
        }
        (len as f64 / self.options.saturation_bytes as f64).min(1.0)
    }

    /// Recomputes the active-queue counts and dequeue shares from the pool.
    fn refresh(&mut self, pool: &BufferPool) {
        let layout = *pool.layout();
        self.active.iter_mut().for_each(|a| *a = 0.0);

        let mut interval_bytes: FxHashMap<QueueId, u64> = FxHashMap::default();
        let mut port_bytes: FxHashMap<u32, u64> = FxHashMap::default();
        for queue in pool.queues() {
            let priority = layout.priority_of(queue.id()) as usize;
            let saturation = self.saturation(queue.len());
            if let Some(active) = self.active.get_mut(priority) {
                *active += saturation;
            }

            let total = queue.dequeued_bytes();
            let last = self.dequeued.insert(queue.id(), total).unwrap_or(0);
            let bytes = total.saturating_sub(last);
            interval_bytes.insert(queue.id(), bytes);
            *port_bytes.entry(layout.port_of(queue.id())).or_default() += bytes;
        }

        self.active.iter_mut().for_each(|a| *a = a.max(1.0));

        let floor = 1.0 / f64::from(layout.num_priorities().max(1));
        self.share = interval_bytes
            .into_iter()
            .map(|(queue, bytes)| {
                let port_total = port_bytes.get(&layout.port_of(queue)).copied().unwrap_or(0);
                let share = if port_total == 0 {
                    1.0
                } else {
                    (bytes as f64 / port_total as f64).clamp(floor, 1.0)
                };
                (queue, share)
            })
            .collect();
    }
}

impl AdmissionPolicy for ActiveBufferManagement {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Abm
    }

    fn evaluate(&mut self, ctx: &AdmissionContext<'_>) -> Verdict {
        let remaining = ctx.pool.remaining();
        let max_size = self.max_size(ctx.queue, ctx.priority, remaining);
        trace!(queue = %ctx.queue, max_size, "abm bound");

        Verdict::from_check(ctx.queue, check_fit(ctx.queue_len(), ctx.size, max_size, remaining))
    }

    fn threshold(&self, queue: QueueId, pool: &BufferPool) -> u64 {
        self.max_size(queue, pool.layout().priority_of(queue), pool.remaining())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.options.update_interval)
    }

    fn on_tick(&mut self, pool: &BufferPool, _now: Timestamp) {
        self.refresh(pool);
    }
}
