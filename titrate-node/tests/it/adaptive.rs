use std::time::Duration;

use titrate_buffer::{FlowId, Membership};
use titrate_common::Timestamp;
use titrate_node::{AdmissionController, Arrival, NodeOptions, ProbeOptions};
use titrate_policy::{DropReason, PolicyKind};

/// Helper functions.
mod helpers {
    use super::*;

    /// A one-queue adaptive node with millisecond-scale probe timing.
    pub fn node(probe: ProbeOptions) -> AdmissionController {
        let options = NodeOptions::default()
            .with_capacity(1_000_000)
            .with_policy(PolicyKind::Adaptive)
            .with_probe(probe);
        AdmissionController::new(options).unwrap()
    }

    pub fn fast_probe() -> ProbeOptions {
        ProbeOptions::default()
            .with_interval(Duration::from_millis(10))
            .with_settle_delay(Duration::from_millis(1))
            .with_post_drop_interval(Duration::from_millis(2))
            .with_min_q_hold(3)
    }

    pub fn packet(size: u64) -> Arrival {
        Arrival::new(0, 0, FlowId(1), size)
    }

    pub fn ms(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }
}

use helpers::{fast_probe, ms, node, packet};

#[test]
fn standing_queue_shrinks_threshold() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut node = node(fast_probe());
    let q = node.layout().queue_id(0, 0);
    node.override_threshold(q, 60_000, ms(0));
    for _ in 0..20 {
        assert!(node.on_packet(packet(1_500), ms(0)).admit);
    }

    // One packet out and one in every millisecond: the queue never drops below 28_500 bytes.
    for t in 1..=41 {
        assert_eq!(node.on_dequeue(q, 1_500, ms(t)), 1_500);
        assert!(node.on_packet(packet(1_500), ms(t)).admit, "dropped at {t}ms");
    }

    let counters = node.counters(q);
    assert_eq!(counters.membership, Some(Membership::Settled));
    // Settled at 1ms, three held intervals, then one capped step of five packets.
    assert_eq!(counters.threshold, 60_000 - 5 * 1_500);
}

#[test]
fn starved_queue_grows_threshold() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut node = node(fast_probe());
    let q = node.layout().queue_id(0, 0);
    node.override_threshold(q, 30_000, ms(0));
    for _ in 0..10 {
        node.on_packet(packet(1_500), ms(0));
    }
    node.advance(ms(1));
    assert_eq!(node.counters(q).membership, Some(Membership::Settled));

    assert_eq!(node.on_dequeue(q, 15_000, ms(2)), 15_000);
    assert!(node.on_packet(packet(1_500), ms(6)).admit);

    // Empty for 4ms of a 10ms window: 30_000 * 10 / 6.
    node.advance(ms(11));
    assert_eq!(node.counters(q).threshold, 50_000);
}

#[test]
fn empty_span_without_arrival_is_not_counted() {
    let mut node = node(fast_probe());
    let q = node.layout().queue_id(0, 0);
    node.override_threshold(q, 30_000, ms(0));
    node.on_packet(packet(1_500), ms(0));
    node.advance(ms(1));
    node.on_dequeue(q, 1_500, ms(2));

    node.advance(ms(11));
    assert_eq!(node.counters(q).threshold, 30_000);
}

#[test]
fn drop_on_settled_queue_shortens_window_once() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut node = node(fast_probe());
    let q = node.layout().queue_id(0, 0);
    node.override_threshold(q, 3_000, ms(0));
    node.on_packet(packet(1_500), ms(0));
    node.on_packet(packet(1_500), ms(0));
    node.advance(ms(1));

    let window = |node: &AdmissionController| node.probe().unwrap().window(q).unwrap().started_at();
    assert_eq!(window(&node), ms(1));

    let decision = node.on_packet(packet(1_500), ms(3));
    assert_eq!(decision.reason, Some(DropReason::ThresholdExceeded));
    assert_eq!(window(&node), ms(3));

    // Still inside the post-drop window.
    node.on_packet(packet(1_500), ms(4));
    assert_eq!(window(&node), ms(3));

    node.advance(ms(5));
    assert_eq!(window(&node), ms(5));
    assert_eq!(node.counters(q).threshold, 3_000);

    // Back on the steady interval.
    node.advance(ms(14));
    assert_eq!(window(&node), ms(5));
    node.advance(ms(15));
    assert_eq!(window(&node), ms(15));
}

#[test]
fn drop_right_after_threshold_change_keeps_window() {
    let mut node = node(fast_probe());
    let q = node.layout().queue_id(0, 0);
    node.override_threshold(q, 3_000, ms(0));
    node.on_packet(packet(1_500), ms(0));
    node.on_packet(packet(1_500), ms(0));
    node.advance(ms(1));

    let window = |node: &AdmissionController| node.probe().unwrap().window(q).unwrap().started_at();
    node.override_threshold(q, 4_500, ms(3));
    assert_eq!(window(&node), ms(3));
    assert!(node.on_packet(packet(1_500), ms(3)).admit);

    let decision = node.on_packet(packet(1_500), ms(4));
    assert_eq!(decision.reason, Some(DropReason::ThresholdExceeded));
    assert_eq!(window(&node), ms(3));

    // One post-drop interval after the change, drops shorten the window again.
    node.on_packet(packet(1_500), ms(5));
    assert_eq!(window(&node), ms(5));
}

#[test]
fn transient_traffic_stays_reserved() {
    let mut node = node(ProbeOptions::default());
    let q = node.layout().queue_id(0, 0);

    assert!(node.on_packet(packet(100), ms(0)).admit);
    node.advance(ms(150));
    assert_eq!(node.counters(q).membership, Some(Membership::Reserved));

    // Over the start credit, but the offered bytes still count towards settling.
    assert!(!node.on_packet(packet(1_500), ms(200)).admit);
    node.advance(ms(299));
    assert_eq!(node.counters(q).membership, Some(Membership::Reserved));
    node.advance(ms(300));
    assert_eq!(node.counters(q).membership, Some(Membership::Settled));
}

#[test]
fn control_class_is_not_probed() {
    let options = NodeOptions::default()
        .with_layout(1, 2)
        .with_policy(PolicyKind::Adaptive)
        .with_control_priority(1);
    let mut node = AdmissionController::new(options).unwrap();
    let control = node.layout().queue_id(0, 1);

    for _ in 0..10 {
        assert!(node.on_packet(Arrival::new(0, 1, FlowId(9), 1_500), ms(0)).admit);
    }
    assert!(!node.probe().unwrap().is_tracking(control));
    assert_eq!(node.counters(control).membership, None);
    assert_eq!(node.pool().ledger().total(), 0);
}
