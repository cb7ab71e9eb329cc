//! Periodic ICMP liveness probing of tracked neighbors
//!
//! Probing only keeps the kernel's neighbor cache entries warm. A failed probe
//! never removes a neighbor; removal is driven solely by kernel state changes.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Continuous reachability exercise

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::neighbor_table::NeighborTable;
use crate::types::Neighbor;
use async_trait::async_trait;
use futures::future::join_all;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time between probe cycles
pub const DEFAULT_PROBE_PERIOD: Duration = Duration::from_secs(30);

/// Echo sequence parameters for a single neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Echo requests per probe
    pub count: u16,
    /// Gap between echo requests
    pub interval: Duration,
    /// Upper bound for the whole probe, replies included
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            count: 3,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one echo sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeReport {
    pub sent: u16,
    pub received: u16,
}

impl ProbeReport {
    pub fn is_success(&self) -> bool {
        self.received > 0
    }
}

/// Sends an echo sequence to one address
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn probe(&self, address: IpAddr) -> Result<ProbeReport>;
}

/// Summary of one probe cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSummary {
    pub probed: usize,
    pub answered: usize,
    pub failed: usize,
}

/// Probes every tracked neighbor once per period
///
/// Fan-out per cycle is one concurrent probe per tracked neighbor with no
/// pool cap, so concurrency is bounded only by the neighbor count.
pub struct LivenessProber<P> {
    table: Arc<NeighborTable>,
    pinger: Arc<P>,
    period: Duration,
    metrics: MetricsCollector,
}

impl<P: Pinger + 'static> LivenessProber<P> {
    pub fn new(table: Arc<NeighborTable>, pinger: P, period: Duration) -> Self {
        Self {
            table,
            pinger: Arc::new(pinger),
            period,
            metrics: MetricsCollector::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Probe every currently tracked neighbor and wait for all probes to finish
    pub async fn run_cycle(&self) -> CycleSummary {
        let neighbors = self.table.snapshot();
        let probes = neighbors.iter().map(|neighbor| self.probe_one(*neighbor));
        let results = join_all(probes).await;

        let summary = CycleSummary {
            probed: results.len(),
            answered: results.iter().filter(|ok| **ok).count(),
            failed: results.iter().filter(|ok| !**ok).count(),
        };
        info!(
            probed = summary.probed,
            answered = summary.answered,
            "Probe cycle finished"
        );
        summary
    }

    async fn probe_one(&self, neighbor: Neighbor) -> bool {
        match self.pinger.probe(neighbor.address).await {
            Ok(report) if report.is_success() => {
                debug!(
                    ip = %neighbor.address,
                    sent = report.sent,
                    received = report.received,
                    "Neighbor answered probe"
                );
                true
            }
            Ok(report) => {
                warn!(ip = %neighbor.address, sent = report.sent, "Probe timed out");
                self.metrics.record_probe_failure();
                false
            }
            Err(e) => {
                warn!(ip = %neighbor.address, error = %e, "Failed to probe neighbor");
                self.metrics.record_probe_failure();
                false
            }
        }
    }

    /// Run probe cycles forever; the next cycle starts one period after the
    /// previous one finished
    pub async fn run(self) {
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.period).await;
        }
    }
}
