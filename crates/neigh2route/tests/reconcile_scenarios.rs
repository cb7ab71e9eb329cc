//! End-to-end reconciliation scenarios
//!
//! Drives the engine through its public API with the in-memory route table,
//! neighbor source and pinger: startup dump, live event loop, periodic tasks
//! and shutdown drain.

use async_trait::async_trait;
use neigh2route::testing::{FakeNeighborSource, FakePinger, FakeRouteTable};
use neigh2route::{
    Decision, EngineState, HostRoute, LivenessProber, MetricsCollector, Neighbor, NeighborEvent,
    NeighborFlags, NeighborSource, NeighborState, Reconciler, RouteBackend, StopReason,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid IP")
}

fn event(addr: &str, link: u32, state: NeighborState) -> NeighborEvent {
    NeighborEvent::new(ip(addr), link, state, NeighborFlags::default())
}

/// Poll `condition` until it holds, failing the test after two seconds
async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_startup_bulk_load() {
    let source = FakeNeighborSource::new(vec![
        event("10.0.0.5", 2, NeighborState::REACHABLE),
        event("10.0.0.6", 2, NeighborState::REACHABLE),
        event("10.0.0.7", 2, NeighborState::STALE),
        event("10.0.0.8", 2, NeighborState::INCOMPLETE),
    ]);
    let routes = FakeRouteTable::new();
    let engine = Reconciler::new(None, routes.clone());

    let seen = engine.initial_sync(&source).await.unwrap();
    assert_eq!(seen, 4);

    let mut tracked: Vec<_> = engine.snapshot().iter().map(|n| n.address).collect();
    tracked.sort();
    assert_eq!(tracked, vec![ip("10.0.0.5"), ip("10.0.0.6"), ip("10.0.0.7")]);
    assert!(routes.contains(ip("10.0.0.5"), 2));
    assert!(routes.contains(ip("10.0.0.6"), 2));
    assert!(routes.contains(ip("10.0.0.7"), 2));
    assert!(!routes.contains(ip("10.0.0.8"), 2));
}

#[tokio::test]
async fn test_live_failed_event_removes_route() {
    let source = FakeNeighborSource::new(vec![event("10.0.0.5", 2, NeighborState::REACHABLE)]);
    let routes = FakeRouteTable::new();
    let engine = Arc::new(Reconciler::new(None, routes.clone()));

    let stream = source.subscribe().await.unwrap();
    engine.initial_sync(&source).await.unwrap();
    assert!(routes.contains(ip("10.0.0.5"), 2));

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(stream).await }
    });

    source.push(event("10.0.0.5", 2, NeighborState::FAILED));
    eventually(|| engine.snapshot().is_empty() && routes.is_empty()).await;

    source.close();
    assert!(runner.await.unwrap().is_err());
}

#[tokio::test]
async fn test_link_local_neighbor_ignored() {
    let source = FakeNeighborSource::new(vec![]);
    let routes = FakeRouteTable::new();
    let engine = Arc::new(Reconciler::new(None, routes.clone()));
    let stream = source.subscribe().await.unwrap();

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(stream).await }
    });

    source.push(event("fe80::1", 2, NeighborState::REACHABLE));
    source.push(event("169.254.10.1", 2, NeighborState::REACHABLE));
    // Marker event proves the two above were processed first
    source.push(event("2001:db8::1", 2, NeighborState::REACHABLE));
    eventually(|| routes.contains(ip("2001:db8::1"), 2)).await;

    assert_eq!(engine.snapshot().len(), 1);
    assert_eq!(routes.len(), 1);
    assert_eq!(routes.add_calls(), 1);

    source.close();
    assert!(runner.await.unwrap().is_err());
}

#[tokio::test]
async fn test_target_link_scope() {
    let source = FakeNeighborSource::new(vec![
        event("10.0.0.5", 2, NeighborState::REACHABLE),
        event("10.0.1.5", 3, NeighborState::REACHABLE),
    ]);
    let routes = FakeRouteTable::new();
    let engine = Arc::new(Reconciler::new(Some(2), routes.clone()));

    let stream = source.subscribe().await.unwrap();
    engine.initial_sync(&source).await.unwrap();

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(stream).await }
    });

    source.push(event("10.0.0.6", 3, NeighborState::REACHABLE));
    source.push(event("10.0.0.7", 2, NeighborState::REACHABLE));
    eventually(|| routes.contains(ip("10.0.0.7"), 2)).await;

    let mut tracked: Vec<_> = engine.snapshot().iter().map(|n| n.address).collect();
    tracked.sort();
    assert_eq!(tracked, vec![ip("10.0.0.5"), ip("10.0.0.7")]);
    assert!(!routes.contains(ip("10.0.0.6"), 3));
    assert!(!routes.contains(ip("10.0.1.5"), 3));

    source.close();
    assert!(runner.await.unwrap().is_err());
}

#[tokio::test]
async fn test_external_learning_evicts() {
    let source = FakeNeighborSource::new(vec![event("10.0.0.5", 2, NeighborState::REACHABLE)]);
    let routes = FakeRouteTable::new();
    let engine = Arc::new(Reconciler::new(None, routes.clone()));

    let stream = source.subscribe().await.unwrap();
    engine.initial_sync(&source).await.unwrap();

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(stream).await }
    });

    source.push(NeighborEvent::new(
        ip("10.0.0.5"),
        2,
        NeighborState::REACHABLE,
        NeighborFlags::EXT_LEARNED,
    ));
    eventually(|| routes.is_empty()).await;
    assert!(engine.snapshot().is_empty());

    source.close();
    assert!(runner.await.unwrap().is_err());
}

#[tokio::test]
async fn test_stream_error_is_fatal() {
    let source = FakeNeighborSource::new(vec![]);
    let engine = Reconciler::new(None, FakeRouteTable::new());
    let stream = source.subscribe().await.unwrap();

    source.fail("receive buffer overrun");
    let err = engine.run(stream).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        engine.state(),
        EngineState::Stopped(StopReason::SubscriptionError(_))
    ));
}

#[tokio::test]
async fn test_route_failures_do_not_stop_processing() {
    let source = FakeNeighborSource::new(vec![]);
    let routes = FakeRouteTable::new();
    routes.set_failing(true);
    let metrics = MetricsCollector::new().unwrap();
    let engine = Arc::new(Reconciler::new(None, routes.clone()).with_metrics(metrics.clone()));
    let stream = source.subscribe().await.unwrap();

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(stream).await }
    });

    source.push(event("10.0.0.5", 2, NeighborState::REACHABLE));
    source.push(event("10.0.0.6", 2, NeighborState::REACHABLE));
    eventually(|| engine.snapshot().len() == 2).await;

    assert!(routes.is_empty());
    assert!(metrics.route_errors_total.get() >= 2.0);
    assert_eq!(engine.state(), EngineState::Running);

    source.close();
    assert!(runner.await.unwrap().is_err());
}

#[tokio::test]
async fn test_periodic_refresh_heals_routes() {
    let source = FakeNeighborSource::new(vec![event("10.0.0.5", 2, NeighborState::REACHABLE)]);
    let routes = FakeRouteTable::new();
    let engine = Arc::new(Reconciler::new(None, routes.clone()));
    engine.initial_sync(&source).await.unwrap();

    routes.remove_out_of_band(ip("10.0.0.5"), 2);
    assert!(routes.is_empty());

    let refresher = tokio::spawn(engine.clone().run_refresh(Duration::from_millis(10)));
    eventually(|| routes.contains(ip("10.0.0.5"), 2)).await;
    refresher.abort();
}

#[tokio::test]
async fn test_periodic_probing_keeps_table() {
    let source = FakeNeighborSource::new(vec![
        event("10.0.0.5", 2, NeighborState::REACHABLE),
        event("10.0.0.6", 2, NeighborState::REACHABLE),
    ]);
    let engine = Reconciler::new(None, FakeRouteTable::new());
    engine.initial_sync(&source).await.unwrap();

    let pinger = FakePinger::new();
    pinger.set_unreachable(ip("10.0.0.5"));
    pinger.set_unreachable(ip("10.0.0.6"));
    let prober = LivenessProber::new(engine.table(), pinger.clone(), Duration::from_millis(10));
    let task = tokio::spawn(prober.run());

    // At least two full cycles
    eventually(|| pinger.probed().len() >= 4).await;
    task.abort();

    assert_eq!(engine.snapshot().len(), 2);
}

#[tokio::test]
async fn test_shutdown_drain() {
    let source = FakeNeighborSource::new(vec![
        event("10.0.0.5", 2, NeighborState::REACHABLE),
        event("2001:db8::5", 3, NeighborState::REACHABLE),
    ]);
    let routes = FakeRouteTable::new();
    let engine = Reconciler::new(None, routes.clone());
    engine.initial_sync(&source).await.unwrap();
    assert_eq!(routes.len(), 2);

    assert_eq!(engine.drain().await, 2);
    assert!(engine.snapshot().is_empty());
    assert!(routes.is_empty());
    assert_eq!(
        engine.state(),
        EngineState::Stopped(StopReason::ShutdownRequested)
    );

    // Second drain finds nothing left to do
    assert_eq!(engine.drain().await, 0);
}

/// Route backend whose `add` parks until released
#[derive(Clone, Default)]
struct ParkedRouteBackend {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl RouteBackend for ParkedRouteBackend {
    async fn exists(&self, _route: &HostRoute) -> neigh2route::Result<bool> {
        Ok(false)
    }

    async fn add(&self, _route: &HostRoute) -> neigh2route::Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }

    async fn delete(&self, _route: &HostRoute) -> neigh2route::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_not_blocked_by_slow_route_install() {
    let backend = ParkedRouteBackend::default();
    let engine = Arc::new(Reconciler::new(None, backend.clone()));
    let table = engine.table();
    let expected = vec![Neighbor::new(ip("10.0.0.5"), 2)];

    let handler = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .handle_event(&event("10.0.0.5", 2, NeighborState::REACHABLE))
                .await
        }
    });
    backend.entered.notified().await;

    // The route install is parked; every reader must still get through
    let from_engine = tokio::time::timeout(
        Duration::from_millis(500),
        tokio::task::spawn_blocking({
            let engine = engine.clone();
            move || engine.snapshot()
        }),
    )
    .await
    .expect("engine snapshot blocked by route install")
    .unwrap();
    assert_eq!(from_engine, expected);

    let from_table = tokio::time::timeout(
        Duration::from_millis(500),
        tokio::task::spawn_blocking({
            let table = table.clone();
            move || table.snapshot()
        }),
    )
    .await
    .expect("table snapshot blocked by route install")
    .unwrap();
    assert_eq!(from_table, expected);

    let pinger = FakePinger::new();
    let prober = LivenessProber::new(table, pinger.clone(), Duration::from_secs(30));
    let summary = tokio::time::timeout(Duration::from_millis(500), prober.run_cycle())
        .await
        .expect("probe cycle blocked by route install");
    assert_eq!(summary.probed, 1);
    assert_eq!(pinger.probed(), vec![ip("10.0.0.5")]);

    backend.release.notify_one();
    let decision = tokio::time::timeout(Duration::from_secs(2), handler)
        .await
        .expect("handler did not finish after release")
        .unwrap();
    assert_eq!(decision, Decision::Admit);
}
