//! Reconciler - neighbor-state events to host routes
//!
//! Consumes the initial neighbor dump and the live neighbor event stream,
//! decides per event whether the neighbor should be routed, and keeps the
//! [`NeighborTable`] and the kernel routing table in step.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Neighbor table monitoring
//! - AU-12: Audit Record Generation - Log all routed-set changes
//! - CM-8: System Component Inventory - Track reachable neighbors

use crate::error::{NeighrouteError, Result};
use crate::metrics::MetricsCollector;
use crate::neighbor_table::{NeighborTable, Upsert};
use crate::netlink::{NeighborSource, NeighborStream};
use crate::route_sync::{RouteBackend, RouteSynchronizer};
use crate::types::{Neighbor, NeighborEvent};
use futures::StreamExt;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Default time between route re-assertion cycles
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(30);

/// Why an event was dropped before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Link-local unicast addresses are never routed
    LinkLocal,
    /// Event is on a link other than the configured target
    OutOfScope,
}

/// What the policy wants done for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ignore(IgnoreReason),
    /// Track the neighbor and ensure its route
    Admit,
    /// Stop tracking the neighbor and clear its route
    Evict,
    /// Transient resolution state, nothing to do
    NoAction,
}

/// Admission policy, evaluated in precedence order
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    target_link: Option<u32>,
}

impl Policy {
    pub fn new(target_link: Option<u32>) -> Self {
        Self { target_link }
    }

    /// Classify one event. STALE admits exactly like REACHABLE.
    pub fn decide(&self, event: &NeighborEvent) -> Decision {
        if event.is_link_local_unicast() {
            return Decision::Ignore(IgnoreReason::LinkLocal);
        }
        if let Some(target) = self.target_link {
            if event.link_index != target {
                return Decision::Ignore(IgnoreReason::OutOfScope);
            }
        }

        let external = event.flags.is_externally_learned();
        if event.state.is_usable() && !external {
            Decision::Admit
        } else if event.state.is_failed() || external {
            Decision::Evict
        } else {
            Decision::NoAction
        }
    }
}

/// Why the engine stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    SubscriptionError(String),
    SubscriptionClosed,
    ShutdownRequested,
}

/// Engine lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopped(StopReason),
}

/// Summary of one route re-assertion cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshSummary {
    pub checked: usize,
    pub failed: usize,
}

/// Neighbor-to-route reconciliation engine
///
/// The table lock is never held across a route call. Instead, an async
/// mutation guard serializes "table change + paired route change" between the
/// event path, the refresh cycle and the drain, so those pairs appear atomic
/// to each other while snapshot readers only ever wait for a map copy.
pub struct Reconciler<B> {
    policy: Policy,
    table: Arc<NeighborTable>,
    routes: RouteSynchronizer<B>,
    mutation: tokio::sync::Mutex<()>,
    state: Mutex<EngineState>,
    metrics: MetricsCollector,
}

impl<B: RouteBackend> Reconciler<B> {
    pub fn new(target_link: Option<u32>, backend: B) -> Self {
        Self {
            policy: Policy::new(target_link),
            table: Arc::new(NeighborTable::new()),
            routes: RouteSynchronizer::new(backend),
            mutation: tokio::sync::Mutex::new(()),
            state: Mutex::new(EngineState::Idle),
            metrics: MetricsCollector::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Shared handle to the table, for the prober and the HTTP surface
    pub fn table(&self) -> Arc<NeighborTable> {
        self.table.clone()
    }

    /// Point-in-time copy of the routed neighbors, in no particular order
    pub fn snapshot(&self) -> Vec<Neighbor> {
        self.table.snapshot()
    }

    pub fn state(&self) -> EngineState {
        self.state.lock().clone()
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    /// Apply the policy to one event. Route failures are logged, never returned.
    pub async fn handle_event(&self, event: &NeighborEvent) -> Decision {
        self.metrics.record_event();
        let decision = self.policy.decide(event);

        if !matches!(decision, Decision::Ignore(_)) {
            debug!(
                ip = %event.address,
                link_index = event.link_index,
                state = %event.state,
                flags = %event.flags,
                "Received neighbor update"
            );
        }

        match decision {
            Decision::Admit => self.admit(event.neighbor()).await,
            Decision::Evict => self.evict(event.address, event.link_index).await,
            Decision::Ignore(_) | Decision::NoAction => {}
        }
        decision
    }

    async fn admit(&self, neighbor: Neighbor) {
        let _guard = self.mutation.lock().await;

        match self.table.upsert(neighbor) {
            Upsert::Unchanged => return,
            Upsert::Inserted => {
                info!(ip = %neighbor.address, link_index = neighbor.link_index, "Adding neighbor");
            }
            Upsert::LinkChanged { previous } => {
                info!(
                    ip = %neighbor.address,
                    old_link = previous,
                    new_link = neighbor.link_index,
                    "Neighbor link index changed, moving route"
                );
                if let Err(e) = self.routes.clear_route(neighbor.address, previous).await {
                    self.route_failed(&e, neighbor.address, previous);
                }
            }
        }
        self.metrics.record_admitted();
        self.metrics.set_tracked_neighbors(self.table.len());

        if let Err(e) = self
            .routes
            .ensure_route(neighbor.address, neighbor.link_index)
            .await
        {
            self.route_failed(&e, neighbor.address, neighbor.link_index);
        }
    }

    async fn evict(&self, address: IpAddr, link_index: u32) {
        let _guard = self.mutation.lock().await;

        // The kernel keeps one entry per link, so a report from a link the
        // address has since left must not touch the current entry
        let neighbor = Neighbor::new(address, link_index);
        if self.table.remove_exact(&neighbor) {
            info!(ip = %address, link_index, "Removing neighbor");
            self.metrics.record_evicted();
            self.metrics.set_tracked_neighbors(self.table.len());
        } else if let Some(tracked) = self.table.get(&address) {
            debug!(
                ip = %address,
                link_index,
                tracked_link = tracked.link_index,
                "Neighbor tracked on another link, keeping it"
            );
        }

        if let Err(e) = self.routes.clear_route(address, link_index).await {
            self.route_failed(&e, address, link_index);
        }
    }

    fn route_failed(&self, err: &NeighrouteError, address: IpAddr, link_index: u32) {
        warn!(ip = %address, link_index, error = %err, "Route operation failed");
        self.metrics.record_route_error();
    }

    /// Replay a full neighbor dump through the policy
    ///
    /// Adopts neighbors that were already reachable before startup. A dump
    /// failure is returned to the caller.
    #[instrument(skip_all)]
    pub async fn initial_sync<S>(&self, source: &S) -> Result<usize>
    where
        S: NeighborSource + ?Sized,
    {
        let events = source.dump(self.policy.target_link).await?;
        info!(count = events.len(), "Initializing neighbor table");

        for event in &events {
            if event.is_link_local_unicast() {
                debug!(ip = %event.address, link_index = event.link_index, "Skipping link-local neighbor");
                continue;
            }
            self.handle_event(event).await;
        }

        info!(tracked = self.table.len(), "Neighbor table initialized");
        Ok(events.len())
    }

    /// Consume the live event stream until it ends
    ///
    /// This is the engine's main loop. It only returns on subscription failure
    /// or termination, which are always errors: there is no resubscription.
    #[instrument(skip_all)]
    pub async fn run(&self, mut stream: NeighborStream) -> Result<()> {
        self.set_state(EngineState::Running);
        info!("Listening to neighbor events");

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    self.handle_event(&event).await;
                }
                Err(e) => {
                    error!(error = %e, "Neighbor subscription failed");
                    self.set_state(EngineState::Stopped(StopReason::SubscriptionError(
                        e.to_string(),
                    )));
                    return Err(NeighrouteError::Subscription(e.to_string()));
                }
            }
        }

        error!("Neighbor subscription closed");
        self.set_state(EngineState::Stopped(StopReason::SubscriptionClosed));
        Err(NeighrouteError::Subscription(
            "neighbor event stream terminated".into(),
        ))
    }

    /// Re-assert the route of every tracked neighbor
    ///
    /// Heals routes dropped out-of-band or whose install failed earlier.
    pub async fn refresh_routes(&self) -> RefreshSummary {
        let neighbors = self.table.snapshot();
        info!(count = neighbors.len(), "Re-asserting neighbor routes");

        let mut summary = RefreshSummary::default();
        for neighbor in neighbors {
            let _guard = self.mutation.lock().await;
            // Evicted or moved since the snapshot was taken
            if !self.table.contains(&neighbor) {
                continue;
            }
            summary.checked += 1;
            if let Err(e) = self
                .routes
                .ensure_route(neighbor.address, neighbor.link_index)
                .await
            {
                self.route_failed(&e, neighbor.address, neighbor.link_index);
                summary.failed += 1;
            }
        }
        summary
    }

    /// Run [`Self::refresh_routes`] forever, one period apart
    pub async fn run_refresh(self: Arc<Self>, period: Duration) {
        loop {
            tokio::time::sleep(period).await;
            self.refresh_routes().await;
        }
    }

    /// Shutdown drain: forget every neighbor and clear its route
    ///
    /// Safe to call more than once; later calls find an empty table. Returns
    /// the number of neighbors drained.
    #[instrument(skip_all)]
    pub async fn drain(&self) -> usize {
        let _guard = self.mutation.lock().await;
        self.set_state(EngineState::Stopped(StopReason::ShutdownRequested));

        let neighbors = self.table.drain();
        self.metrics.set_tracked_neighbors(0);
        for neighbor in &neighbors {
            match self
                .routes
                .clear_route(neighbor.address, neighbor.link_index)
                .await
            {
                Ok(_) => info!(ip = %neighbor.address, "Removed route for neighbor"),
                Err(e) => self.route_failed(&e, neighbor.address, neighbor.link_index),
            }
        }
        neighbors.len()
    }
}
