use std::time::Duration;

use criterion::{
    criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId, Criterion,
    Throughput,
};
use futures::StreamExt;
use rand::{rngs::StdRng, Rng, SeedableRng};

use titrate::{AdmissionController, Arrival, FlowId, NodeHandle, NodeOptions, PolicyKind, Timestamp};
use tokio::runtime::Runtime;

const N_PACKETS: usize = 100_000;
const PAR_FACTOR: usize = 64;
const PORTS: u32 = 32;
const PRIORITIES: u32 = 2;

fn options(policy: PolicyKind) -> NodeOptions {
    NodeOptions::default()
        .with_capacity(4 * titrate::constants::MiB)
        .with_layout(PORTS, PRIORITIES)
        .with_alphas([1.0, 0.5])
        .with_policy(policy)
}

/// A fixed trace of arrivals, each followed by the departure of the same packet half the time.
fn trace(n: usize) -> Vec<(Arrival, bool)> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| {
            let port = rng.gen_range(0..PORTS);
            let arrival = Arrival::new(
                port,
                rng.gen_range(0..PRIORITIES),
                FlowId(rng.gen_range(0..256)),
                rng.gen_range(64..=1_500),
            );
            (arrival, rng.gen_bool(0.5))
        })
        .collect()
}

fn bench_controller(mut group: BenchmarkGroup<'_, WallTime>) {
    let packets = trace(N_PACKETS);

    for policy in PolicyKind::ALL {
        group.throughput(Throughput::Elements(N_PACKETS as u64));
        group.bench_function(BenchmarkId::from_parameter(policy), |b| {
            b.iter(|| {
                let mut node = AdmissionController::new(options(policy)).unwrap();
                let mut now = Timestamp::ZERO;
                for (arrival, depart) in &packets {
                    now += Duration::from_nanos(120);
                    let decision = node.on_packet(*arrival, now);
                    if *depart && decision.admit {
                        node.on_dequeue(decision.queue, arrival.size, now);
                    }
                }
            });
        });
    }

    group.finish();
}

fn bench_driver(rt: &Runtime, mut group: BenchmarkGroup<'_, WallTime>) {
    let packets: Vec<_> = trace(N_PACKETS / 10).into_iter().map(|(arrival, _)| arrival).collect();

    for policy in [PolicyKind::Dt, PolicyKind::Adaptive] {
        let node = rt.block_on(async { NodeHandle::spawn(options(policy)).unwrap() });

        group.throughput(Throughput::Elements(packets.len() as u64));
        group.bench_function(BenchmarkId::from_parameter(policy), |b| {
            b.iter(|| {
                rt.block_on(async {
                    futures::stream::iter(packets.iter().copied())
                        .map(|arrival| {
                            let node = node.clone();
                            async move {
                                let decision = node.admit(arrival).await.unwrap();
                                if decision.admit {
                                    node.depart(decision.queue, arrival.size).await.unwrap();
                                }
                            }
                        })
                        .buffer_unordered(PAR_FACTOR)
                        .for_each(|_| async {})
                        .await;
                });
            });
        });
    }

    group.finish();
}

fn admission_controller(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt::try_init();

    let mut group = c.benchmark_group("admission_controller_pps");
    group.sample_size(10);
    bench_controller(group);
}

fn admission_driver(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt::try_init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("admission_driver_pps");
    group.sample_size(10);
    bench_driver(&rt, group);
}

criterion_group! {
    name = benches;
    config = Criterion::default().warm_up_time(Duration::from_secs(1));
    targets = admission_controller, admission_driver
}

criterion_main!(benches);
