//! Idempotent host-route installation and removal
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-3: Configuration Change Control - Only add/remove routes when needed
//! - AU-12: Audit Record Generation - Log every routing table change

use crate::error::Result;
use crate::types::host_prefix_len;
use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, info, instrument};

/// A single-address route scoped to one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostRoute {
    pub address: IpAddr,
    pub link_index: u32,
}

impl HostRoute {
    pub fn new(address: IpAddr, link_index: u32) -> Self {
        Self {
            address,
            link_index,
        }
    }

    /// /32 for IPv4, /128 for IPv6
    pub fn prefix_len(&self) -> u8 {
        host_prefix_len(&self.address)
    }
}

impl fmt::Display for HostRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} link {}",
            self.address,
            self.prefix_len(),
            self.link_index
        )
    }
}

/// Routing table operations the synchronizer needs from the OS
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteBackend: Send + Sync {
    /// Whether an equivalent link-scoped host route is installed
    async fn exists(&self, route: &HostRoute) -> Result<bool>;

    async fn add(&self, route: &HostRoute) -> Result<()>;

    async fn delete(&self, route: &HostRoute) -> Result<()>;
}

/// What a synchronizer call did to the routing table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    Installed,
    AlreadyPresent,
    Removed,
    AlreadyAbsent,
}

/// Idempotent wrapper over a [`RouteBackend`]
///
/// Holds no state of its own; every call consults the backend first so
/// repeated calls never produce duplicate-route errors.
pub struct RouteSynchronizer<B> {
    backend: B,
}

impl<B: RouteBackend> RouteSynchronizer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub async fn route_exists(&self, address: IpAddr, link_index: u32) -> Result<bool> {
        self.backend
            .exists(&HostRoute::new(address, link_index))
            .await
    }

    /// Install the host route unless an equivalent one is already present
    #[instrument(skip(self))]
    pub async fn ensure_route(&self, address: IpAddr, link_index: u32) -> Result<RouteChange> {
        let route = HostRoute::new(address, link_index);
        if self.backend.exists(&route).await? {
            debug!(route = %route, "Route already present");
            return Ok(RouteChange::AlreadyPresent);
        }

        self.backend.add(&route).await?;
        info!(ip = %address, link_index, "Added route");
        Ok(RouteChange::Installed)
    }

    /// Remove the host route if present; absent is not an error
    #[instrument(skip(self))]
    pub async fn clear_route(&self, address: IpAddr, link_index: u32) -> Result<RouteChange> {
        let route = HostRoute::new(address, link_index);
        if !self.backend.exists(&route).await? {
            debug!(route = %route, "Route already absent");
            return Ok(RouteChange::AlreadyAbsent);
        }

        self.backend.delete(&route).await?;
        info!(ip = %address, link_index, "Removed route");
        Ok(RouteChange::Removed)
    }
}
