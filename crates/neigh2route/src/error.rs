//! Error types for neigh2route
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include sufficient detail for audit

use std::net::IpAddr;
use thiserror::Error;

/// Errors that can occur in neigh2route
///
/// Only [`NeighrouteError::is_fatal`] errors are allowed to stop the engine;
/// everything else is logged by the caller and processing continues.
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
#[derive(Debug, Error)]
pub enum NeighrouteError {
    /// Netlink socket or message error
    /// NIST: SC-7 (Boundary Protection) - Kernel interface errors
    #[error("Netlink error: {0}")]
    Netlink(String),

    /// Interface name did not resolve to a link index
    /// NIST: CM-8 (System Component Inventory) - Interface tracking
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Host route add/remove/lookup failed
    #[error("Route operation for {address} on link {link_index} failed: {reason}")]
    Route {
        address: IpAddr,
        link_index: u32,
        reason: String,
    },

    /// Host route operation did not complete in time
    #[error("Route operation for {address} on link {link_index} timed out")]
    RouteTimeout { address: IpAddr, link_index: u32 },

    /// Liveness probe could not be run
    #[error("Probe of {address} failed: {reason}")]
    Probe { address: IpAddr, reason: String },

    /// Neighbor event subscription failed or terminated
    /// NIST: SI-4 (System Monitoring) - Loss of monitoring input
    #[error("Neighbor subscription error: {0}")]
    Subscription(String),

    /// Configuration error
    /// NIST: CM-6 (Configuration Settings) - Configuration validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NeighrouteError {
    /// Whether this error must end the engine rather than be logged and skipped
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Subscription(_) | Self::InterfaceNotFound(_) | Self::Config(_)
        )
    }

    pub(crate) fn route(address: IpAddr, link_index: u32, reason: impl ToString) -> Self {
        Self::Route {
            address,
            link_index,
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for neigh2route operations
pub type Result<T> = std::result::Result<T, NeighrouteError>;
