//! In-memory stand-ins for the kernel
//!
//! Route table, neighbor source and pinger implementations that keep their
//! state in memory. Used by unit and integration tests; handles are cheap to
//! clone and share state so a test can inspect what the engine did.

use crate::error::{NeighrouteError, Result};
use crate::netlink::{NeighborSource, NeighborStream};
use crate::prober::{Pinger, ProbeReport};
use crate::route_sync::{HostRoute, RouteBackend};
use crate::types::NeighborEvent;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Routing table kept in a set
#[derive(Debug, Clone, Default)]
pub struct FakeRouteTable {
    routes: Arc<Mutex<HashSet<HostRoute>>>,
    failing: Arc<AtomicBool>,
    adds: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl FakeRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail like a permission error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contains(&self, address: IpAddr, link_index: u32) -> bool {
        self.routes
            .lock()
            .contains(&HostRoute::new(address, link_index))
    }

    /// Simulate another process deleting a route
    pub fn remove_out_of_band(&self, address: IpAddr, link_index: u32) {
        self.routes
            .lock()
            .remove(&HostRoute::new(address, link_index));
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }

    pub fn add_calls(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check(&self, route: &HostRoute) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NeighrouteError::route(
                route.address,
                route.link_index,
                "Operation not permitted",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RouteBackend for FakeRouteTable {
    async fn exists(&self, route: &HostRoute) -> Result<bool> {
        self.check(route)?;
        Ok(self.routes.lock().contains(route))
    }

    async fn add(&self, route: &HostRoute) -> Result<()> {
        self.check(route)?;
        self.adds.fetch_add(1, Ordering::SeqCst);
        if !self.routes.lock().insert(*route) {
            return Err(NeighrouteError::route(
                route.address,
                route.link_index,
                "File exists",
            ));
        }
        Ok(())
    }

    async fn delete(&self, route: &HostRoute) -> Result<()> {
        self.check(route)?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if !self.routes.lock().remove(route) {
            return Err(NeighrouteError::route(
                route.address,
                route.link_index,
                "No such process",
            ));
        }
        Ok(())
    }
}

/// Live event stream fed from a channel. Dropping the sender ends the stream.
pub fn event_channel() -> (mpsc::UnboundedSender<Result<NeighborEvent>>, NeighborStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, stream.boxed())
}

/// Neighbor source with a fixed dump and a channel-backed subscription
pub struct FakeNeighborSource {
    dump: Vec<NeighborEvent>,
    live: Mutex<Option<NeighborStream>>,
    live_tx: Mutex<Option<mpsc::UnboundedSender<Result<NeighborEvent>>>>,
}

impl FakeNeighborSource {
    pub fn new(dump: Vec<NeighborEvent>) -> Self {
        let (tx, stream) = event_channel();
        Self {
            dump,
            live: Mutex::new(Some(stream)),
            live_tx: Mutex::new(Some(tx)),
        }
    }

    /// Deliver one live event to the subscriber
    pub fn push(&self, event: NeighborEvent) {
        if let Some(tx) = self.live_tx.lock().as_ref() {
            let _ = tx.send(Ok(event));
        }
    }

    /// Terminate the subscription with an error
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = self.live_tx.lock().take() {
            let _ = tx.send(Err(NeighrouteError::Netlink(reason.to_string())));
        }
    }

    /// End the subscription cleanly
    pub fn close(&self) {
        self.live_tx.lock().take();
    }
}

#[async_trait]
impl NeighborSource for FakeNeighborSource {
    async fn dump(&self, scope: Option<u32>) -> Result<Vec<NeighborEvent>> {
        Ok(self
            .dump
            .iter()
            .filter(|e| scope.is_none_or(|link| e.link_index == link))
            .copied()
            .collect())
    }

    async fn subscribe(&self) -> Result<NeighborStream> {
        self.live
            .lock()
            .take()
            .ok_or_else(|| NeighrouteError::Subscription("already subscribed".into()))
    }
}

/// Pinger that answers every probe unless told otherwise
#[derive(Debug, Clone, Default)]
pub struct FakePinger {
    probed: Arc<Mutex<Vec<IpAddr>>>,
    unreachable: Arc<Mutex<HashSet<IpAddr>>>,
    erroring: Arc<Mutex<HashSet<IpAddr>>>,
}

impl FakePinger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes of `address` get no replies
    pub fn set_unreachable(&self, address: IpAddr) {
        self.unreachable.lock().insert(address);
    }

    /// Probes of `address` fail to run at all
    pub fn set_erroring(&self, address: IpAddr) {
        self.erroring.lock().insert(address);
    }

    /// Every address probed so far, in call order
    pub fn probed(&self) -> Vec<IpAddr> {
        self.probed.lock().clone()
    }
}

#[async_trait]
impl Pinger for FakePinger {
    async fn probe(&self, address: IpAddr) -> Result<ProbeReport> {
        self.probed.lock().push(address);
        if self.erroring.lock().contains(&address) {
            return Err(NeighrouteError::Probe {
                address,
                reason: "Operation not permitted".into(),
            });
        }
        let received = if self.unreachable.lock().contains(&address) {
            0
        } else {
            3
        };
        Ok(ProbeReport { sent: 3, received })
    }
}
