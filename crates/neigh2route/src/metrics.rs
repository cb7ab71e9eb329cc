//! Prometheus metrics collection for neigh2route
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-6: Audit Record Review - Metrics available for analysis
//! - SI-4: System Monitoring - Reconciliation and probe health

use prometheus::{Counter, Gauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector shared by the engine, the prober and the HTTP surface
#[derive(Clone)]
pub struct MetricsCollector {
    // Counters
    pub events_total: Counter,
    pub neighbors_admitted_total: Counter,
    pub neighbors_evicted_total: Counter,
    pub route_errors_total: Counter,
    pub probe_failures_total: Counter,

    // Gauges
    pub tracked_neighbors: Gauge,

    // Registry for export
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_total = Counter::with_opts(Opts::new(
            "neigh2route_events_total",
            "Total number of neighbor events evaluated",
        ))?;
        registry.register(Box::new(events_total.clone()))?;

        let neighbors_admitted_total = Counter::with_opts(Opts::new(
            "neigh2route_neighbors_admitted_total",
            "Total number of neighbors added to the routed set",
        ))?;
        registry.register(Box::new(neighbors_admitted_total.clone()))?;

        let neighbors_evicted_total = Counter::with_opts(Opts::new(
            "neigh2route_neighbors_evicted_total",
            "Total number of neighbors removed from the routed set",
        ))?;
        registry.register(Box::new(neighbors_evicted_total.clone()))?;

        let route_errors_total = Counter::with_opts(Opts::new(
            "neigh2route_route_errors_total",
            "Total number of failed route operations",
        ))?;
        registry.register(Box::new(route_errors_total.clone()))?;

        let probe_failures_total = Counter::with_opts(Opts::new(
            "neigh2route_probe_failures_total",
            "Total number of liveness probes that failed or timed out",
        ))?;
        registry.register(Box::new(probe_failures_total.clone()))?;

        let tracked_neighbors = Gauge::with_opts(Opts::new(
            "neigh2route_tracked_neighbors",
            "Current number of neighbors with a managed host route",
        ))?;
        registry.register(Box::new(tracked_neighbors.clone()))?;

        Ok(Self {
            events_total,
            neighbors_admitted_total,
            neighbors_evicted_total,
            route_errors_total,
            probe_failures_total,
            tracked_neighbors,
            registry: Arc::new(registry),
        })
    }

    pub fn record_event(&self) {
        self.events_total.inc();
    }

    pub fn record_admitted(&self) {
        self.neighbors_admitted_total.inc();
    }

    pub fn record_evicted(&self) {
        self.neighbors_evicted_total.inc();
    }

    pub fn record_route_error(&self) {
        self.route_errors_total.inc();
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures_total.inc();
    }

    pub fn set_tracked_neighbors(&self, count: usize) {
        self.tracked_neighbors.set(count as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics collector")
    }
}
