use std::time::Duration;

use titrate_common::Timestamp;

/// Per-queue feedback accumulated since the last reset.
///
/// The window is read and reset in one step with [`MonitoringWindow::take`]. The open empty
/// span (if the queue is currently empty) survives a reset: an empty period only counts toward
/// [`WindowSnapshot::zero_queue_duration`] once an arrival closes it, and only the part of it
/// that falls inside the current window.
#[derive(Debug, Clone)]
pub struct MonitoringWindow {
    sent_bytes: u64,
    dropped_bytes: u64,
    min_occupancy: u64,
    max_occupancy: u64,
    zero_queue_duration: Duration,
    last_non_zero: Timestamp,
    empty_since: Option<Timestamp>,
    started_at: Timestamp,
}

/// What a [`MonitoringWindow`] saw over one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub started_at: Timestamp,
    /// Length of the interval the snapshot covers.
    pub interval: Duration,
    pub sent_bytes: u64,
    pub dropped_bytes: u64,
    /// `None` if no occupancy was observed.
    pub min_occupancy: Option<u64>,
    pub max_occupancy: u64,
    pub zero_queue_duration: Duration,
    pub last_non_zero: Timestamp,
}

impl MonitoringWindow {
    pub fn new(now: Timestamp) -> Self {
        Self {
            sent_bytes: 0,
            dropped_bytes: 0,
            min_occupancy: u64::MAX,
            max_occupancy: 0,
            zero_queue_duration: Duration::ZERO,
            last_non_zero: now,
            empty_since: None,
            started_at: now,
        }
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Returns how long the window has been open at `now`.
    pub fn elapsed(&self, now: Timestamp) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn record_sent(&mut self, size: u64) {
        self.sent_bytes += size;
    }

    pub fn record_drop(&mut self, size: u64) {
        self.dropped_bytes += size;
    }

    pub fn observe_occupancy(&mut self, bytes: u64, now: Timestamp) {
        self.min_occupancy = self.min_occupancy.min(bytes);
        self.max_occupancy = self.max_occupancy.max(bytes);
        if bytes > 0 {
            self.last_non_zero = now;
        }
    }

    /// The queue drained to zero at `now`.
    pub fn on_empty(&mut self, now: Timestamp) {
        self.empty_since.get_or_insert(now);
    }

    /// A packet arrived at `now`. Closes the open empty span, if any.
    pub fn on_arrival(&mut self, now: Timestamp) {
        if let Some(since) = self.empty_since.take() {
            let since = since.max(self.started_at);
            self.zero_queue_duration += now.saturating_duration_since(since);
        }
    }

    /// Returns the accumulated feedback and starts a new window at `now`.
    pub fn take(&mut self, now: Timestamp) -> WindowSnapshot {
        let snapshot = self.peek(now);
        self.reset(now);
        snapshot
    }

    pub fn peek(&self, now: Timestamp) -> WindowSnapshot {
        WindowSnapshot {
            started_at: self.started_at,
            interval: self.elapsed(now),
            sent_bytes: self.sent_bytes,
            dropped_bytes: self.dropped_bytes,
            min_occupancy: (self.min_occupancy != u64::MAX).then_some(self.min_occupancy),
            max_occupancy: self.max_occupancy,
            zero_queue_duration: self.zero_queue_duration,
            last_non_zero: self.last_non_zero,
        }
    }

    /// Clears the accumulators and restarts the window at `now`. An open empty span is kept.
    pub fn reset(&mut self, now: Timestamp) {
        let empty_since = self.empty_since;
        *self = Self::new(now);
        self.empty_since = empty_since;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_span_counts_only_when_closed_by_arrival() {
        let mut w = MonitoringWindow::new(Timestamp::ZERO);
        w.on_empty(Timestamp::from_millis(1));
        assert_eq!(w.peek(Timestamp::from_millis(3)).zero_queue_duration, Duration::ZERO);

        w.on_arrival(Timestamp::from_millis(3));
        assert_eq!(w.peek(Timestamp::from_millis(3)).zero_queue_duration, Duration::from_millis(2));

        // A second arrival while non-empty adds nothing.
        w.on_arrival(Timestamp::from_millis(4));
        assert_eq!(w.take(Timestamp::from_millis(5)).zero_queue_duration, Duration::from_millis(2));
    }

    #[test]
    fn empty_span_is_clipped_to_window_start() {
        let mut w = MonitoringWindow::new(Timestamp::ZERO);
        w.on_empty(Timestamp::from_millis(2));

        let first = w.take(Timestamp::from_millis(5));
        assert_eq!(first.zero_queue_duration, Duration::ZERO);

        w.on_arrival(Timestamp::from_millis(6));
        let second = w.take(Timestamp::from_millis(10));
        assert_eq!(second.zero_queue_duration, Duration::from_millis(1));
        assert_eq!(second.interval, Duration::from_millis(5));
    }

    #[test]
    fn take_resets_accumulators() {
        let mut w = MonitoringWindow::new(Timestamp::ZERO);
        w.record_sent(1_500);
        w.record_drop(500);
        w.observe_occupancy(3_000, Timestamp::from_micros(10));
        w.observe_occupancy(1_000, Timestamp::from_micros(20));

        let snap = w.take(Timestamp::from_micros(100));
        assert_eq!(snap.sent_bytes, 1_500);
        assert_eq!(snap.dropped_bytes, 500);
        assert_eq!(snap.min_occupancy, Some(1_000));
        assert_eq!(snap.max_occupancy, 3_000);
        assert_eq!(snap.last_non_zero, Timestamp::from_micros(20));

        let next = w.peek(Timestamp::from_micros(150));
        assert_eq!(next.sent_bytes, 0);
        assert_eq!(next.min_occupancy, None);
        assert_eq!(next.started_at, Timestamp::from_micros(100));
    }
}
