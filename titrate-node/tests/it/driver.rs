use std::time::Duration;

use futures::future::join_all;
use titrate_buffer::{FlowId, Membership};
use titrate_node::{AdmissionController, Arrival, NodeDriver, NodeError, NodeHandle, NodeOptions, ProbeOptions};
use titrate_policy::{ConfigError, DropReason, PolicyKind};

#[tokio::test]
async fn driver_admits_and_releases() {
    let _ = tracing_subscriber::fmt::try_init();

    let node = NodeHandle::spawn(NodeOptions::default().with_capacity(3_000).with_policy(PolicyKind::Cs))
        .unwrap();

    let first = node.admit(Arrival::new(0, 0, FlowId(1), 3_000)).await.unwrap();
    assert!(first.admit);
    let second = node.admit(Arrival::new(0, 0, FlowId(1), 1)).await.unwrap();
    assert_eq!(second.reason, Some(DropReason::CapacityExceeded));

    let counters = node.counters(first.queue).await.unwrap();
    assert_eq!(counters.occupancy, 3_000);
    assert_eq!(counters.dropped_bytes, 1);

    assert_eq!(node.depart(first.queue, 3_000).await.unwrap(), 3_000);
    assert_eq!(node.counters(first.queue).await.unwrap().occupancy, 0);
}

#[tokio::test]
async fn driver_fires_timers_on_runtime_clock() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = NodeOptions::default()
        .with_policy(PolicyKind::Adaptive)
        .with_probe(ProbeOptions::default().with_settle_delay(Duration::from_millis(5)));
    let node = NodeHandle::spawn(options).unwrap();

    let decision = node.admit(Arrival::new(0, 0, FlowId(1), 1_500)).await.unwrap();
    assert!(decision.admit);
    assert_eq!(node.counters(decision.queue).await.unwrap().membership, Some(Membership::Reserved));

    tokio::time::sleep(Duration::from_millis(50)).await;

    let counters = node.counters(decision.queue).await.unwrap();
    assert_eq!(counters.membership, Some(Membership::Settled));
    assert_eq!(counters.threshold, 1_500);

    let change = node.override_threshold(decision.queue, 6_000).await.unwrap();
    assert_eq!(change.current, 6_000);
    assert!(node.end_flow(decision.queue).await.unwrap());
    assert_eq!(node.counters(decision.queue).await.unwrap().membership, None);
}

#[tokio::test]
async fn handles_share_one_controller() {
    let node = NodeHandle::spawn(NodeOptions::default().with_layout(4, 1)).unwrap();

    let senders = (0..4).map(|port| {
        let node = node.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                node.admit(Arrival::new(port, 0, FlowId(u64::from(port)), 100)).await.unwrap();
            }
        })
    });
    for result in join_all(senders).await {
        result.unwrap();
    }

    for port in 0..4 {
        let queue = NodeOptions::default().with_layout(4, 1).layout.queue_id(port, 0);
        assert_eq!(node.counters(queue).await.unwrap().sent_bytes, 1_000);
    }
}

#[tokio::test]
async fn invalid_options_are_rejected() {
    let err = NodeHandle::spawn(NodeOptions::default().with_capacity(0)).unwrap_err();
    assert!(matches!(err, NodeError::Config(ConfigError::ZeroCapacity)));
}

#[tokio::test]
async fn stopped_driver_closes_handle() {
    let controller = AdmissionController::new(NodeOptions::default()).unwrap();
    let (node, driver) = NodeDriver::new(controller);
    drop(driver);

    let err = node.admit(Arrival::new(0, 0, FlowId(0), 64)).await.unwrap_err();
    assert!(matches!(err, NodeError::Closed));
}
