use std::fmt;

/// Identifies one virtual queue: a single (output port, priority class) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u32);

impl QueueId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Opaque flow identifier carried in packet metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(pub u64);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// The port × priority grid that queue identifiers are laid out on.
///
/// `queue = port * num_priorities + priority`. Priorities at or beyond `num_priorities` are
/// clamped to the last priority class instead of spilling into the neighbouring port, and ports
/// at or beyond `num_ports` to the last port, so every pair maps into the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLayout {
    num_ports: u32,
    num_priorities: u32,
}

impl QueueLayout {
    pub const fn new(num_ports: u32, num_priorities: u32) -> Self {
        Self { num_ports, num_priorities }
    }

    pub const fn num_ports(&self) -> u32 {
        self.num_ports
    }

    pub const fn num_priorities(&self) -> u32 {
        self.num_priorities
    }

    /// Total number of queues, or `None` if they do not all fit in a [`QueueId`].
    pub const fn num_queues(&self) -> Option<u32> {
        self.num_ports.checked_mul(self.num_priorities)
    }

    /// Returns `true` if the layout has no queues at all.
    pub const fn is_empty(&self) -> bool {
        self.num_ports == 0 || self.num_priorities == 0
    }

    /// Maps an out-of-range priority onto the last configured priority class.
    pub fn clamp_priority(&self, priority: u32) -> u32 {
        priority.min(self.num_priorities.saturating_sub(1))
    }

    /// Maps an out-of-range port onto the last configured port.
    pub fn clamp_port(&self, port: u32) -> u32 {
        port.min(self.num_ports.saturating_sub(1))
    }

    /// The queue of (`port`, `priority`), both clamped to the layout.
    pub fn queue_id(&self, port: u32, priority: u32) -> QueueId {
        let port = self.clamp_port(port);
        let priority = self.clamp_priority(priority);
        QueueId(port.saturating_mul(self.num_priorities).saturating_add(priority))
    }

    pub fn port_of(&self, queue: QueueId) -> u32 {
        queue.0.checked_div(self.num_priorities).unwrap_or(0)
    }

    pub fn priority_of(&self, queue: QueueId) -> u32 {
        queue.0.checked_rem(self.num_priorities).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_id_round_trips_through_layout() {
        let layout = QueueLayout::new(4, 3);
        let q = layout.queue_id(2, 1);
        assert_eq!(q, QueueId::new(7));
        assert_eq!(layout.port_of(q), 2);
        assert_eq!(layout.priority_of(q), 1);
        assert_eq!(layout.num_queues(), Some(12));
        assert_eq!(QueueLayout::new(u32::MAX, 2).num_queues(), None);
    }

    #[test]
    fn priority_beyond_layout_is_clamped() {
        let layout = QueueLayout::new(2, 3);
        assert_eq!(layout.queue_id(1, 9), layout.queue_id(1, 2));
        assert_eq!(layout.queue_id(1, 9), QueueId::new(5));
    }

    #[test]
    fn port_beyond_layout_is_clamped() {
        let layout = QueueLayout::new(2, 3);
        assert_eq!(layout.queue_id(7, 1), layout.queue_id(1, 1));
        assert_eq!(layout.queue_id(u32::MAX, 0), QueueId::new(3));
        assert_eq!(layout.queue_id(u32::MAX - 1, 0), layout.queue_id(u32::MAX, 0));
        assert_ne!(layout.queue_id(0, 0), layout.queue_id(u32::MAX, 0));
    }
}
