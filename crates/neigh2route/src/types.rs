//! Core types for neighbor-to-route reconciliation
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Neighbor entries as network components
//! - SI-4: System Monitoring - Neighbor state tracking

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::BitOr;

/// A neighbor tracked in the routed set
///
/// Identity is the address alone; an address is tracked against one link at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Neighbor {
    /// Neighbor IP address
    pub address: IpAddr,
    /// Interface index the neighbor was observed on
    pub link_index: u32,
}

impl Neighbor {
    pub fn new(address: IpAddr, link_index: u32) -> Self {
        Self {
            address,
            link_index,
        }
    }
}

impl fmt::Display for Neighbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (link {})", self.address, self.link_index)
    }
}

/// Kernel neighbor state bitmask (NUD_* values from linux/neighbour.h)
///
/// # NIST Controls
/// - SI-4: System Monitoring - Track neighbor reachability states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NeighborState(u16);

impl NeighborState {
    /// Address resolution in progress
    pub const INCOMPLETE: Self = Self(0x01);
    /// Neighbor confirmed reachable
    pub const REACHABLE: Self = Self(0x02);
    /// Previously reachable, not recently confirmed
    pub const STALE: Self = Self(0x04);
    pub const DELAY: Self = Self(0x08);
    pub const PROBE: Self = Self(0x10);
    /// Resolution failed
    pub const FAILED: Self = Self(0x20);
    pub const NOARP: Self = Self(0x40);
    pub const PERMANENT: Self = Self(0x80);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::INCOMPLETE, "INCOMPLETE"),
        (Self::REACHABLE, "REACHABLE"),
        (Self::STALE, "STALE"),
        (Self::DELAY, "DELAY"),
        (Self::PROBE, "PROBE"),
        (Self::FAILED, "FAILED"),
        (Self::NOARP, "NOARP"),
        (Self::PERMANENT, "PERMANENT"),
    ];

    /// Create from a raw kernel NUD_* bitmask
    pub const fn from_kernel(state: u16) -> Self {
        Self(state)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if any bit of `other` is set in `self`
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Reachable or stale: the neighbor has a usable link-layer address
    #[inline]
    pub const fn is_usable(self) -> bool {
        self.intersects(Self(Self::REACHABLE.0 | Self::STALE.0))
    }

    #[inline]
    pub const fn is_failed(self) -> bool {
        self.intersects(Self::FAILED)
    }
}

impl BitOr for NeighborState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for NeighborState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_names(f, &Self::NAMES, |s| self.intersects(*s), "UNKNOWN")
    }
}

/// Kernel neighbor flags (NTF_* values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NeighborFlags(u8);

impl NeighborFlags {
    pub const USE: Self = Self(0x01);
    pub const SELF: Self = Self(0x02);
    pub const MASTER: Self = Self(0x04);
    pub const PROXY: Self = Self(0x08);
    /// Installed by another control plane (e.g. VXLAN EVPN), not by reachability detection
    pub const EXT_LEARNED: Self = Self(0x10);
    pub const OFFLOADED: Self = Self(0x20);
    pub const STICKY: Self = Self(0x40);
    pub const ROUTER: Self = Self(0x80);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::USE, "USE"),
        (Self::SELF, "SELF"),
        (Self::MASTER, "MASTER"),
        (Self::PROXY, "PROXY"),
        (Self::EXT_LEARNED, "EXT_LEARNED"),
        (Self::OFFLOADED, "OFFLOADED"),
        (Self::STICKY, "STICKY"),
        (Self::ROUTER, "ROUTER"),
    ];

    /// Create from raw kernel NTF_* flags
    pub const fn from_kernel(flags: u8) -> Self {
        Self(flags)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_externally_learned(self) -> bool {
        self.contains(Self::EXT_LEARNED)
    }
}

impl BitOr for NeighborFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for NeighborFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_names(f, &Self::NAMES, |flag| self.contains(*flag), "NONE")
    }
}

fn write_names<T>(
    f: &mut fmt::Formatter<'_>,
    names: &[(T, &'static str)],
    is_set: impl Fn(&T) -> bool,
    empty: &str,
) -> fmt::Result {
    let mut first = true;
    for (value, name) in names {
        if is_set(value) {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
    }
    if first {
        f.write_str(empty)?;
    }
    Ok(())
}

/// A neighbor-state report from the kernel, either from the initial dump or
/// from the live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborEvent {
    pub address: IpAddr,
    pub link_index: u32,
    pub state: NeighborState,
    pub flags: NeighborFlags,
}

impl NeighborEvent {
    pub fn new(address: IpAddr, link_index: u32, state: NeighborState, flags: NeighborFlags) -> Self {
        Self {
            address,
            link_index,
            state,
            flags,
        }
    }

    pub fn neighbor(&self) -> Neighbor {
        Neighbor::new(self.address, self.link_index)
    }

    pub fn is_link_local_unicast(&self) -> bool {
        is_link_local_unicast(&self.address)
    }
}

/// Check if an address is link-local unicast (169.254.0.0/16 or fe80::/10)
///
/// NIST: SC-7 - Link-local addresses never leave the link and are never routed
pub fn is_link_local_unicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_ipv4_link_local(v4),
        IpAddr::V6(v6) => is_ipv6_link_local(v6),
    }
}

#[inline]
fn is_ipv4_link_local(addr: &Ipv4Addr) -> bool {
    addr.is_link_local()
}

#[inline]
fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Prefix length of a host route for this address family
pub fn host_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(NeighborState::REACHABLE.to_string(), "REACHABLE");
        assert_eq!(
            (NeighborState::REACHABLE | NeighborState::STALE).to_string(),
            "REACHABLE|STALE"
        );
        assert_eq!(NeighborState::default().to_string(), "UNKNOWN");
    }

    #[test]
    fn test_state_usable() {
        assert!(NeighborState::REACHABLE.is_usable());
        assert!(NeighborState::STALE.is_usable());
        assert!((NeighborState::DELAY | NeighborState::STALE).is_usable());
        assert!(!NeighborState::DELAY.is_usable());
        assert!(!NeighborState::PROBE.is_usable());
        assert!(!NeighborState::INCOMPLETE.is_usable());
        assert!(NeighborState::from_kernel(0x20).is_failed());
    }

    #[test]
    fn test_flags() {
        let flags = NeighborFlags::from_kernel(0x90);
        assert!(flags.is_externally_learned());
        assert!(flags.contains(NeighborFlags::ROUTER));
        assert_eq!(flags.to_string(), "EXT_LEARNED|ROUTER");
        assert_eq!(NeighborFlags::default().to_string(), "NONE");
        assert!(!NeighborFlags::PROXY.is_externally_learned());
    }

    #[test]
    fn test_link_local_detection() {
        assert!(is_link_local_unicast(&"fe80::1".parse().unwrap()));
        assert!(is_link_local_unicast(&"febf::1".parse().unwrap()));
        assert!(is_link_local_unicast(&"169.254.10.1".parse().unwrap()));
        assert!(!is_link_local_unicast(&"2001:db8::1".parse().unwrap()));
        assert!(!is_link_local_unicast(&"ff02::1".parse().unwrap()));
        assert!(!is_link_local_unicast(&"10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn test_host_prefix_len() {
        assert_eq!(host_prefix_len(&"10.0.0.5".parse().unwrap()), 32);
        assert_eq!(host_prefix_len(&"2001:db8::5".parse().unwrap()), 128);
    }
}
