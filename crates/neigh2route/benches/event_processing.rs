//! Event processing benchmarks
//!
//! Measures policy classification, table updates and the full
//! event-to-route path against the in-memory route table.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use neigh2route::testing::FakeRouteTable;
use neigh2route::{Neighbor, NeighborEvent, NeighborFlags, NeighborState, NeighborTable, Policy, Reconciler};
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn make_event(index: usize, state: NeighborState) -> NeighborEvent {
    let address = if index % 2 == 0 {
        IpAddr::V4(Ipv4Addr::from(0x0a00_0000 | (index as u32 & 0x00ff_ffff)))
    } else {
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, index as u16))
    };
    NeighborEvent::new(address, 2 + (index % 4) as u32, state, NeighborFlags::default())
}

fn bench_policy(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy");
    let policy = Policy::new(Some(2));

    let cases = [
        ("reachable", make_event(0, NeighborState::REACHABLE)),
        ("failed", make_event(0, NeighborState::FAILED)),
        ("out_of_scope", make_event(1, NeighborState::REACHABLE)),
        (
            "link_local",
            NeighborEvent::new(
                "fe80::1".parse().unwrap(),
                2,
                NeighborState::REACHABLE,
                NeighborFlags::default(),
            ),
        ),
    ];

    for (name, event) in &cases {
        group.bench_function(*name, |b| b.iter(|| policy.decide(black_box(event))));
    }
    group.finish();
}

fn bench_table_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_upsert");

    for size in [100usize, 1_000, 10_000] {
        let neighbors: Vec<Neighbor> = (0..size)
            .map(|i| make_event(i, NeighborState::REACHABLE).neighbor())
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &neighbors, |b, neighbors| {
            b.iter(|| {
                let table = NeighborTable::new();
                for neighbor in neighbors {
                    black_box(table.upsert(*neighbor));
                }
                table.len()
            });
        });
    }
    group.finish();
}

fn bench_event_to_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_to_route");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    for batch in [10usize, 100, 1_000] {
        let admits: Vec<_> = (0..batch)
            .map(|i| make_event(i, NeighborState::REACHABLE))
            .collect();
        let evicts: Vec<_> = (0..batch)
            .map(|i| make_event(i, NeighborState::FAILED))
            .collect();

        group.throughput(Throughput::Elements(2 * batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, _| {
            b.iter(|| {
                runtime.block_on(async {
                    let engine = Reconciler::new(None, FakeRouteTable::new());
                    for event in admits.iter().chain(&evicts) {
                        black_box(engine.handle_event(event).await);
                    }
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_policy, bench_table_upsert, bench_event_to_route);
criterion_main!(benches);
