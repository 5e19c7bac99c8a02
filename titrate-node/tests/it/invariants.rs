use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use titrate_buffer::{FlowId, QueueId};
use titrate_common::Timestamp;
use titrate_node::{AdmissionController, Arrival, NodeOptions, ProbeOptions};
use titrate_policy::{DropReason, FabOptions, IbOptions, PolicyKind};

const CAPACITY: u64 = 200_000;
const PORTS: u32 = 4;
const PRIORITIES: u32 = 3;

fn options(policy: PolicyKind) -> NodeOptions {
    NodeOptions::default()
        .with_capacity(CAPACITY)
        .with_layout(PORTS, PRIORITIES)
        .with_policy(policy)
        .with_alphas([2.0, 1.0, 0.5])
        .with_probe(
            ProbeOptions::default()
                .with_interval(Duration::from_millis(2))
                .with_settle_delay(Duration::from_micros(500))
                .with_post_drop_interval(Duration::from_micros(500))
                .with_min_q_hold(2),
        )
        .with_fab(FabOptions::default().with_window(Duration::from_millis(1)))
        .with_ib(IbOptions::default().with_seed(3))
}

fn assert_consistent(node: &AdmissionController) {
    let pool = node.pool();
    assert_eq!(pool.occupied() + pool.remaining(), pool.capacity());

    let by_priority: u64 = (0..PRIORITIES).map(|p| pool.occupied_by_priority(p)).sum();
    assert_eq!(by_priority, pool.occupied());

    let queued: u64 = pool.queues().map(|q| q.len()).sum();
    assert_eq!(queued, pool.occupied());

    let ledger = pool.ledger();
    let thresholds: u64 = ledger.iter().map(|(_, entry)| entry.threshold).sum();
    assert_eq!(thresholds, ledger.total());
    assert!(ledger.total() <= pool.capacity(), "ledger over capacity: {}", ledger.total());
}

/// Drives `node` with a random mix of arrivals, departures, overrides and flow ends.
fn run_trace(node: &mut AdmissionController, seed: u64, steps: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut now = Timestamp::ZERO;
    let adaptive = node.policy_kind() == PolicyKind::Adaptive;

    for _ in 0..steps {
        now += Duration::from_micros(rng.gen_range(0..200));
        let port = rng.gen_range(0..PORTS);
        let priority = rng.gen_range(0..PRIORITIES);
        let queue = node.layout().queue_id(port, priority);

        match rng.gen_range(0..100) {
            0..=59 => {
                let size = rng.gen_range(64..=1_500);
                let arrival = Arrival::new(port, priority, FlowId(rng.gen_range(0..20)), size);

                node.advance(now);
                let expected = expected_adaptive(node, queue, size);
                let occupied = node.pool().occupied();

                let decision = node.on_packet(arrival, now);
                if decision.admit {
                    assert_eq!(node.pool().occupied(), occupied + size);
                } else {
                    assert_eq!(node.pool().occupied(), occupied);
                    assert!(decision.reason.is_some());
                }
                if let (true, Some(expected)) = (adaptive, expected) {
                    assert_eq!(decision.admit, expected, "{decision:?} at {now}");
                }
            }
            60..=97 => {
                let len = node.pool().queue_len(queue);
                let released = node.on_dequeue(queue, rng.gen_range(1..=3_000), now);
                assert!(released <= len);
            }
            98 => {
                node.override_threshold(queue, rng.gen_range(0..CAPACITY), now);
            }
            _ => {
                node.end_flow(queue, now);
            }
        }

        assert_consistent(node);
    }
}

/// The adaptive admission rule for a queue that already holds a threshold.
fn expected_adaptive(node: &AdmissionController, queue: QueueId, size: u64) -> Option<bool> {
    let pool = node.pool();
    let threshold = pool.ledger().entry(queue)?.threshold;
    Some(pool.queue_len(queue) + size <= threshold && pool.remaining() >= size)
}

#[test]
fn random_traces_keep_buffer_consistent() {
    let _ = tracing_subscriber::fmt::try_init();

    for policy in PolicyKind::ALL {
        for seed in 0..4 {
            let mut node = AdmissionController::new(options(policy)).unwrap();
            run_trace(&mut node, seed, 5_000);
        }
    }
}

#[test]
fn control_class_only_needs_capacity() {
    let mut node =
        AdmissionController::new(options(PolicyKind::Dt).with_control_priority(0)).unwrap();
    let mut rng = StdRng::seed_from_u64(11);

    let mut now = Timestamp::ZERO;
    loop {
        now += Duration::from_micros(1);
        let size = rng.gen_range(64..=1_500);
        let remaining = node.pool().remaining();
        let decision = node.on_packet(Arrival::new(rng.gen_range(0..PORTS), 0, FlowId(0), size), now);

        assert_eq!(decision.admit, remaining >= size);
        if !decision.admit {
            assert_eq!(decision.reason, Some(DropReason::CapacityExceeded));
            break;
        }
    }
    assert!(node.pool().remaining() < 1_500);
    assert_consistent(&node);
}
