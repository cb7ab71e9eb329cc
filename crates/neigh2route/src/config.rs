//! Command line and runtime configuration
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Validated daemon settings
//! - CM-7: Least Functionality - HTTP surface can be disabled

use crate::engine::DEFAULT_REFRESH_PERIOD;
use crate::error::{NeighrouteError, Result};
use crate::prober::DEFAULT_PROBE_PERIOD;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Default bind address of the HTTP surface
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9099";

/// Mirror reachable kernel neighbors as host routes
#[derive(Debug, Clone, Parser)]
#[command(name = "neigh2route", version, about)]
pub struct Cli {
    /// Interface to monitor for neighbor updates (all interfaces if omitted)
    #[arg(long)]
    pub interface: Option<String>,

    /// Address for the HTTP surface
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Do not start the HTTP surface
    #[arg(long)]
    pub no_api: bool,

    /// Seconds between liveness probe cycles
    #[arg(long, default_value_t = DEFAULT_PROBE_PERIOD.as_secs())]
    pub probe_interval: u64,

    /// Seconds between route re-assertion cycles
    #[arg(long, default_value_t = DEFAULT_REFRESH_PERIOD.as_secs())]
    pub refresh_interval: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Validated daemon settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Target interface name; `None` watches every link
    pub interface: Option<String>,
    /// HTTP bind address; `None` disables the surface
    pub listen: Option<SocketAddr>,
    pub probe_period: Duration,
    pub refresh_period: Duration,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: None,
            listen: DEFAULT_LISTEN_ADDR.parse().ok(),
            probe_period: DEFAULT_PROBE_PERIOD,
            refresh_period: DEFAULT_REFRESH_PERIOD,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.probe_interval == 0 {
            return Err(NeighrouteError::Config(
                "probe interval must be greater than zero".into(),
            ));
        }
        if cli.refresh_interval == 0 {
            return Err(NeighrouteError::Config(
                "refresh interval must be greater than zero".into(),
            ));
        }

        // An empty --interface is the same as none
        let interface = cli.interface.filter(|name| !name.is_empty());

        Ok(Self {
            interface,
            listen: (!cli.no_api).then_some(cli.listen),
            probe_period: Duration::from_secs(cli.probe_interval),
            refresh_period: Duration::from_secs(cli.refresh_interval),
            debug: cli.debug,
        })
    }

    /// Resolve the target interface to a link index
    ///
    /// `Ok(None)` means every link is in scope. An unknown name is fatal.
    pub fn resolve_target<F>(&self, lookup: F) -> Result<Option<u32>>
    where
        F: FnOnce(&str) -> Result<u32>,
    {
        self.interface.as_deref().map(lookup).transpose()
    }
}
