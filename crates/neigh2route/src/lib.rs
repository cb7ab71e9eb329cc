//! Neighbor-to-route reconciliation daemon
//!
//! Watches the kernel neighbor table (ARP for IPv4, NDP for IPv6) and keeps a
//! link-scoped host route (`/32` or `/128`) in the main routing table for every
//! neighbor that is currently reachable. Routes are removed again when the
//! neighbor fails or becomes externally learned.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-3 | Access Enforcement | Route changes require CAP_NET_ADMIN |
//! | AU-3 | Content of Audit Records | Structured logging with neighbor details |
//! | AU-12 | Audit Record Generation | All routed-set changes logged |
//! | CM-6 | Configuration Settings | Validated command line settings |
//! | CM-8 | System Component Inventory | Track reachable neighbors |
//! | SI-4 | System Monitoring | Real-time neighbor monitoring |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Linux Kernel   │     │   neigh2route    │     │  Linux Kernel   │
//! │                 │     │                  │     │                 │
//! │  Neighbor Table │────▶│ KernelNeighbor-  │     │  Main Routing   │
//! │  RTM_NEWNEIGH   │     │ Source           │     │  Table          │
//! │                 │     │        │         │     │                 │
//! └─────────────────┘     │        ▼         │     │  /32, /128      │
//!                         │   Reconciler ────┼────▶│  scope link     │
//!                         │        │         │     │                 │
//!                         │        ▼         │     └─────────────────┘
//!                         │  NeighborTable ◀─┼──── LivenessProber (ICMP)
//!                         │        │         │
//!                         │        ▼         │
//!                         │  HTTP /neighbors │
//!                         └──────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
#[cfg(target_os = "linux")]
pub mod icmp;
pub mod metrics;
pub mod neighbor_table;
pub mod netlink;
pub mod prober;
pub mod rest_api;
pub mod route_sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use config::{Cli, Config};
pub use engine::{Decision, EngineState, IgnoreReason, Policy, Reconciler, StopReason};
pub use error::{NeighrouteError, Result};
#[cfg(target_os = "linux")]
pub use icmp::IcmpPinger;
pub use metrics::MetricsCollector;
pub use neighbor_table::NeighborTable;
pub use netlink::{
    KernelNeighborSource, NeighborSource, NeighborStream, NetlinkRouteBackend, link_index_by_name,
};
pub use prober::{LivenessProber, Pinger, ProbeConfig, ProbeReport};
pub use rest_api::{ApiState, NeighborView};
pub use route_sync::{HostRoute, RouteBackend, RouteChange, RouteSynchronizer};
pub use types::{Neighbor, NeighborEvent, NeighborFlags, NeighborState};
