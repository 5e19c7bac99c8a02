use std::{collections::VecDeque, time::Duration};

use rustc_hash::FxHashMap;
use titrate_buffer::{BufferPool, Membership, MonitoringWindow, QueueId, WindowSnapshot};
use titrate_common::{Timestamp, TimerQueue};
use tracing::{debug, trace, warn};

use crate::{controller::TimerKey, ProbeOptions};

/// What one probe evaluation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Increase(u64),
    Decrease(u64),
    Hold,
}

impl Adjustment {
    fn delta(self) -> i64 {
        match self {
            Self::Increase(bytes) => i64::try_from(bytes).unwrap_or(i64::MAX),
            Self::Decrease(bytes) => -i64::try_from(bytes).unwrap_or(i64::MAX),
            Self::Hold => 0,
        }
    }
}

/// Probe state of one queue.
#[derive(Debug)]
struct QueueProbe {
    window: MonitoringWindow,
    /// Expected length of the current window: the steady interval, or the post-drop interval.
    window_len: Duration,
    /// Consecutive intervals with the minimum occupancy above the floor.
    hold: u32,
    /// Minimum occupancy of the last intervals, newest last.
    minima: VecDeque<u64>,
    post_drop: bool,
    /// Bytes offered since the last settle check.
    offered: u64,
}

impl QueueProbe {
    fn new(now: Timestamp, occupancy: u64, window_len: Duration) -> Self {
        let mut window = MonitoringWindow::new(now);
        window.observe_occupancy(occupancy, now);
        Self { window, window_len, hold: 0, minima: VecDeque::new(), post_drop: false, offered: 0 }
    }

    fn restart_window(&mut self, now: Timestamp, occupancy: u64, window_len: Duration) {
        self.window.reset(now);
        self.window.observe_occupancy(occupancy, now);
        self.window_len = window_len;
    }

    fn forget_history(&mut self) {
        self.hold = 0;
        self.minima.clear();
    }

    /// Applies the probe rule to one finished window.
    fn evaluate(
        &mut self,
        options: &ProbeOptions,
        snapshot: &WindowSnapshot,
        threshold: u64,
    ) -> Adjustment {
        let zero = snapshot.zero_queue_duration;
        if !zero.is_zero() {
            self.forget_history();
            return increase(threshold, snapshot.interval, zero);
        }

        let floor = options.floor_bytes();
        let Some(min) = snapshot.min_occupancy.filter(|m| *m > floor) else {
            self.forget_history();
            return Adjustment::Hold;
        };

        if self.minima.len() == options.history_len {
            self.minima.pop_front();
        }
        self.minima.push_back(min);
        self.hold += 1;

        if self.hold < options.min_q_hold {
            return Adjustment::Hold;
        }

        let robust = robust_min(&self.minima, options.min_q_outlier * options.packet_size)
            .unwrap_or(min);
        let step = (robust.saturating_sub(floor) / options.decrease_ratio)
            .min(options.step_decrease_cap * options.packet_size)
            .max(1);

        Adjustment::Decrease(step)
    }
}

/// `threshold × interval / (interval − zero)`, rounded up, as a strictly positive increase.
fn increase(threshold: u64, interval: Duration, zero: Duration) -> Adjustment {
    if zero >= interval {
        warn!(?interval, ?zero, "empty for the whole interval, leaving threshold unchanged");
        return Adjustment::Hold;
    }

    let interval = interval.as_nanos();
    let busy = interval - zero.as_nanos();
    let target = (u128::from(threshold) * interval).div_ceil(busy);
    let target = u64::try_from(target).unwrap_or(u64::MAX);

    Adjustment::Increase(target.saturating_sub(threshold).max(1))
}

/// The smallest sample within `band` bytes of the running mean.
fn robust_min(samples: &VecDeque<u64>, band: u64) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }

    let mean = samples.iter().map(|s| u128::from(*s)).sum::<u128>() / samples.len() as u128;
    let mean = u64::try_from(mean).unwrap_or(u64::MAX);
    samples.iter().copied().filter(|s| s.abs_diff(mean) <= band).min()
}

/// The adaptive threshold controller.
///
/// Every queue moves through two states. A queue opens *reserved*, holding the start credit.
/// After the settle delay it becomes *settled* if it was offered at least the sustained byte
/// count in the meantime; otherwise it stays reserved until its next arrival re-arms the check.
/// A settled queue is probed once per interval:
///
/// 1. if it was empty for part of the interval, the threshold grows by the factor
///    `interval / (interval − empty)`;
/// 2. if its minimum occupancy stayed above the safety floor for `min_q_hold` consecutive
///    intervals, the threshold shrinks by `min(step cap, (robust min − floor) / ratio)`;
/// 3. otherwise nothing changes.
///
/// A drop on a settled queue shortens the current window to the post-drop interval, once.
#[derive(Debug)]
pub struct AdaptiveProbe {
    options: ProbeOptions,
    queues: FxHashMap<QueueId, QueueProbe>,
}

impl AdaptiveProbe {
    pub fn new(options: ProbeOptions) -> Self {
        Self { options, queues: FxHashMap::default() }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    pub fn window(&self, queue: QueueId) -> Option<&MonitoringWindow> {
        self.queues.get(&queue).map(|q| &q.window)
    }

    pub(crate) fn window_mut(&mut self, queue: QueueId) -> Option<&mut MonitoringWindow> {
        self.queues.get_mut(&queue).map(|q| &mut q.window)
    }

    pub fn is_tracking(&self, queue: QueueId) -> bool {
        self.queues.contains_key(&queue)
    }

    /// Starts tracking `queue`. Returns `false` if it was already tracked.
    pub(crate) fn open(
        &mut self,
        queue: QueueId,
        now: Timestamp,
        occupancy: u64,
        timers: &mut TimerQueue<TimerKey>,
    ) -> bool {
        if self.queues.contains_key(&queue) {
            return false;
        }

        self.queues.insert(queue, QueueProbe::new(now, occupancy, self.options.interval));
        timers.reschedule(TimerKey::Settle(queue), now + self.options.settle_delay);
        trace!(queue = %queue, "probe opened");
        true
    }

    /// Stops tracking `queue`. The caller disarms its timers.
    pub(crate) fn forget(&mut self, queue: QueueId) -> bool {
        self.queues.remove(&queue).is_some()
    }

    /// Counts offered bytes towards the settle check and makes sure a reserved queue has one
    /// armed.
    pub(crate) fn on_offered(
        &mut self,
        queue: QueueId,
        size: u64,
        now: Timestamp,
        pool: &BufferPool,
        timers: &mut TimerQueue<TimerKey>,
    ) {
        let Some(state) = self.queues.get_mut(&queue) else { return };
        state.offered = state.offered.saturating_add(size);

        if pool.ledger().membership(queue) == Some(Membership::Reserved) {
            timers.schedule(TimerKey::Settle(queue), now + self.options.settle_delay);
        }
    }

    /// The threshold of `queue` was changed outside the probe schedule.
    pub(crate) fn on_threshold_change(&mut self, queue: QueueId, now: Timestamp, occupancy: u64) {
        if let Some(state) = self.queues.get_mut(&queue) {
            state.restart_window(now, occupancy, self.options.interval);
            state.forget_history();
        }
    }

    /// A settled queue dropped a packet: evaluate early, over a short window. A threshold
    /// changed less than one post-drop interval ago is given its current window instead.
    pub(crate) fn on_drop(
        &mut self,
        queue: QueueId,
        now: Timestamp,
        pool: &BufferPool,
        timers: &mut TimerQueue<TimerKey>,
    ) {
        if pool.ledger().membership(queue) != Some(Membership::Settled) {
            return;
        }
        let Some(state) = self.queues.get_mut(&queue) else { return };
        if state.post_drop {
            return;
        }
        let window_len = self.options.post_drop_interval;
        let last_changed = pool.ledger().entry(queue).and_then(|e| e.last_changed);
        if last_changed.is_some_and(|at| now < at + window_len) {
            trace!(queue = %queue, "threshold changed recently, keeping window");
            return;
        }

        state.post_drop = true;
        state.restart_window(now, pool.queue_len(queue), window_len);
        timers.reschedule(TimerKey::Probe(queue), now + window_len);
        debug!(queue = %queue, ?window_len, "post-drop window started");
    }

    pub(crate) fn on_settle_timer(
        &mut self,
        queue: QueueId,
        at: Timestamp,
        pool: &mut BufferPool,
        timers: &mut TimerQueue<TimerKey>,
    ) {
        if pool.ledger().membership(queue) != Some(Membership::Reserved) {
            return;
        }
        let Some(state) = self.queues.get_mut(&queue) else { return };

        let offered = std::mem::take(&mut state.offered);
        if offered < self.options.sustained_bytes() {
            trace!(queue = %queue, offered, "transient traffic, staying reserved");
            return;
        }

        pool.settle(queue);
        state.restart_window(at, pool.queue_len(queue), self.options.interval);
        state.forget_history();
        timers.reschedule(TimerKey::Probe(queue), at + self.options.interval);
    }

    pub(crate) fn on_probe_timer(
        &mut self,
        queue: QueueId,
        at: Timestamp,
        pool: &mut BufferPool,
        timers: &mut TimerQueue<TimerKey>,
    ) {
        if pool.ledger().membership(queue) != Some(Membership::Settled) {
            return;
        }
        let Some(state) = self.queues.get_mut(&queue) else { return };

        // The window was restarted after this timer was armed.
        let due = state.window.started_at() + state.window_len;
        if at < due {
            timers.reschedule(TimerKey::Probe(queue), due);
            return;
        }

        let snapshot = state.window.take(at);
        let occupancy = pool.queue_len(queue);
        state.window.observe_occupancy(occupancy, at);

        let threshold = pool.ledger().threshold(queue);
        let adjustment = state.evaluate(&self.options, &snapshot, threshold);
        trace!(
            queue = %queue,
            threshold,
            ?adjustment,
            zero = ?snapshot.zero_queue_duration,
            min = ?snapshot.min_occupancy,
            "probe"
        );

        if adjustment != Adjustment::Hold {
            let change = pool.request_threshold_change(queue, adjustment.delta(), at);
            if change.changed() {
                state.forget_history();
            }
        }

        state.post_drop = false;
        state.window_len = self.options.interval;
        timers.reschedule(TimerKey::Probe(queue), at + self.options.interval);
    }
}
