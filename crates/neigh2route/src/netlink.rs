//! Netlink access to the kernel neighbor and routing tables
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel interface for network state
//! - SI-4: System Monitoring - Monitor neighbor table changes
//! - AC-3: Access Enforcement - Route changes require CAP_NET_ADMIN

use crate::error::Result;
use crate::types::NeighborEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Live neighbor events; ends (or yields an error) only when the subscription dies
pub type NeighborStream = BoxStream<'static, Result<NeighborEvent>>;

/// Source of neighbor-state reports
#[async_trait]
pub trait NeighborSource: Send + Sync {
    /// One-shot listing of every current neighbor, optionally limited to one link
    async fn dump(&self, scope: Option<u32>) -> Result<Vec<NeighborEvent>>;

    /// Subscribe to neighbor changes
    async fn subscribe(&self) -> Result<NeighborStream>;
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{NeighborSource, NeighborStream};
    use crate::error::{NeighrouteError, Result};
    use crate::route_sync::{HostRoute, RouteBackend};
    use crate::types::{NeighborEvent, NeighborFlags, NeighborState};
    use async_trait::async_trait;
    use futures::StreamExt;
    use netlink_packet_core::{
        NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST, NetlinkHeader,
        NetlinkMessage, NetlinkPayload,
    };
    use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
    use netlink_packet_route::route::{
        RouteAddress, RouteAttribute, RouteHeader, RouteMessage, RouteProtocol, RouteScope,
        RouteType,
    };
    use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use std::collections::VecDeque;
    use std::io;
    use std::net::IpAddr;
    use std::os::fd::AsRawFd;
    use std::time::Duration;
    use tokio::io::unix::AsyncFd;
    use tracing::{debug, instrument, trace, warn};

    /// Netlink group for neighbor notifications (RTNLGRP_NEIGH = 3)
    const RTNLGRP_NEIGH: u32 = 3;

    /// Socket receive buffer size (1MB) for handling burst loads
    /// NIST: SC-5 - DoS protection via adequate buffer sizing
    const SOCKET_RECV_BUFFER_SIZE: usize = 1024 * 1024;

    /// Upper bound for one route request/ack exchange
    pub const DEFAULT_ROUTE_OP_TIMEOUT: Duration = Duration::from_secs(5);

    /// Resolve an interface name to its link index
    ///
    /// # NIST Controls
    /// - CM-8: System Component Inventory - Interface resolution
    pub fn link_index_by_name(name: &str) -> Result<u32> {
        nix::net::if_::if_nametoindex(name)
            .map_err(|_| NeighrouteError::InterfaceNotFound(name.to_string()))
    }

    /// Serialize one rtnetlink request with the given `NLM_F_*` flags
    fn encode_request(message: RouteNetlinkMessage, flags: u16) -> Vec<u8> {
        let mut header = NetlinkHeader::default();
        header.flags = flags;
        header.sequence_number = 1;
        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(message));
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);
        buf
    }

    /// Send one rtnetlink request and collect the replies until DONE or ACK
    fn request(message: RouteNetlinkMessage, flags: u16) -> io::Result<Vec<RouteNetlinkMessage>> {
        let mut socket = Socket::new(NETLINK_ROUTE)?;
        socket.bind_auto()?;
        socket.connect(&SocketAddr::new(0, 0))?;
        socket.send(&encode_request(message, flags), 0)?;

        let mut replies = Vec::new();
        loop {
            let (data, _) = socket.recv_from_full()?;
            let mut offset = 0;
            while offset < data.len() {
                let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&data[offset..])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                let len = msg.header.length as usize;
                if len == 0 {
                    break;
                }
                // Align to 4 bytes (netlink alignment requirement)
                offset += (len + 3) & !3;

                match msg.payload {
                    NetlinkPayload::Done(_) => return Ok(replies),
                    NetlinkPayload::Error(err) => {
                        return match err.code {
                            Some(code) => Err(io::Error::from_raw_os_error(-code.get())),
                            None => Ok(replies),
                        };
                    }
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    _ => {}
                }
            }
        }
    }

    /// Convert an RTM_NEWNEIGH payload into an event
    ///
    /// Returns `None` for non-IP families and for messages without a destination.
    pub fn neighbor_event_from_message(msg: &NeighbourMessage) -> Option<NeighborEvent> {
        if !matches!(msg.header.family, AddressFamily::Inet | AddressFamily::Inet6) {
            return None;
        }

        let address = msg.attributes.iter().find_map(|attr| match attr {
            NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => Some(IpAddr::V4(*v4)),
            NeighbourAttribute::Destination(NeighbourAddress::Inet6(v6)) => Some(IpAddr::V6(*v6)),
            _ => None,
        })?;

        Some(NeighborEvent::new(
            address,
            msg.header.ifindex,
            NeighborState::from_kernel(u16::from(msg.header.state)),
            NeighborFlags::from_kernel(msg.header.flags.bits()),
        ))
    }

    /// Parse a datagram from the subscription socket
    fn parse_events(data: &[u8]) -> Result<Vec<NeighborEvent>> {
        let mut events = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&data[offset..])
                .map_err(|e| NeighrouteError::Netlink(format!("Failed to parse message: {}", e)))?;
            let len = msg.header.length as usize;
            if len == 0 {
                break;
            }
            offset += (len + 3) & !3;

            if let NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh)) =
                &msg.payload
            {
                match neighbor_event_from_message(neigh) {
                    Some(event) => events.push(event),
                    None => trace!("Ignoring non-IP neighbor message"),
                }
            }
        }

        Ok(events)
    }

    /// Kernel neighbor table via rtnetlink
    #[derive(Debug, Default, Clone, Copy)]
    pub struct KernelNeighborSource;

    impl KernelNeighborSource {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl NeighborSource for KernelNeighborSource {
        #[instrument(skip(self))]
        async fn dump(&self, scope: Option<u32>) -> Result<Vec<NeighborEvent>> {
            let replies = tokio::task::spawn_blocking(move || {
                let mut msg = NeighbourMessage::default();
                msg.header.ifindex = scope.unwrap_or(0);
                request(
                    RouteNetlinkMessage::GetNeighbour(msg),
                    NLM_F_REQUEST | NLM_F_DUMP,
                )
            })
            .await
            .map_err(|e| NeighrouteError::Netlink(format!("Dump task failed: {}", e)))?
            .map_err(|e| NeighrouteError::Netlink(format!("Failed to dump neighbors: {}", e)))?;

            let events: Vec<_> = replies
                .iter()
                .filter_map(|reply| match reply {
                    RouteNetlinkMessage::NewNeighbour(neigh) => neighbor_event_from_message(neigh),
                    _ => None,
                })
                .filter(|event| scope.is_none_or(|link| event.link_index == link))
                .collect();

            debug!(count = events.len(), "Dumped neighbor table");
            Ok(events)
        }

        async fn subscribe(&self) -> Result<NeighborStream> {
            let subscription = NeighborSubscription::open().map_err(|e| {
                NeighrouteError::Subscription(format!("Failed to subscribe to neighbors: {}", e))
            })?;
            Ok(subscription.into_stream())
        }
    }

    /// RTNLGRP_NEIGH multicast socket driven by tokio's epoll integration
    struct NeighborSubscription {
        socket: AsyncFd<Socket>,
        pending: VecDeque<NeighborEvent>,
    }

    impl NeighborSubscription {
        fn open() -> io::Result<Self> {
            let mut socket = Socket::new(NETLINK_ROUTE)?;
            let groups = 1 << (RTNLGRP_NEIGH - 1);
            socket.bind(&SocketAddr::new(0, groups))?;
            socket.set_non_blocking(true)?;
            tune_socket(&socket);
            debug!("Netlink socket bound to RTNLGRP_NEIGH");

            Ok(Self {
                socket: AsyncFd::new(socket)?,
                pending: VecDeque::new(),
            })
        }

        async fn next_event(&mut self) -> Result<NeighborEvent> {
            loop {
                if let Some(event) = self.pending.pop_front() {
                    return Ok(event);
                }

                let mut guard = self.socket.readable().await?;
                match guard.try_io(|inner| inner.get_ref().recv_from_full()) {
                    Ok(Ok((data, _))) => self.pending.extend(parse_events(&data)?),
                    Ok(Err(e)) => {
                        return Err(NeighrouteError::Netlink(format!("Failed to receive: {}", e)));
                    }
                    Err(_would_block) => continue,
                }
            }
        }

        /// Stream that yields events until the first receive error, then ends
        fn into_stream(self) -> NeighborStream {
            futures::stream::unfold(Some(self), |state| async move {
                let mut sub = state?;
                match sub.next_event().await {
                    Ok(event) => Some((Ok(event), Some(sub))),
                    Err(e) => Some((Err(e), None)),
                }
            })
            .boxed()
        }
    }

    /// Tune socket buffer settings for bursts of neighbor events
    ///
    /// Overruns are left visible: the kernel reports ENOBUFS on the next
    /// receive, which ends the subscription.
    ///
    /// # NIST Controls
    /// - SC-5: DoS Protection - Prevent buffer overflow under burst load
    fn tune_socket(socket: &Socket) {
        let fd = socket.as_raw_fd();

        let size = SOCKET_RECV_BUFFER_SIZE as libc::c_int;

        // SAFETY: fd is a valid open socket and `size` outlives the call
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &size as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            warn!("Failed to set SO_RCVBUF, using default buffer size");
        }
    }

    fn address_family(addr: &IpAddr) -> AddressFamily {
        match addr {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    fn route_address(addr: &IpAddr) -> RouteAddress {
        match addr {
            IpAddr::V4(v4) => RouteAddress::Inet(*v4),
            IpAddr::V6(v6) => RouteAddress::Inet6(*v6),
        }
    }

    /// Link-scoped host route in the main table
    pub fn host_route_message(route: &HostRoute) -> RouteMessage {
        let mut msg = RouteMessage::default();
        msg.header.address_family = address_family(&route.address);
        msg.header.destination_prefix_length = route.prefix_len();
        msg.header.table = RouteHeader::RT_TABLE_MAIN;
        msg.header.protocol = RouteProtocol::Boot;
        msg.header.scope = RouteScope::Link;
        msg.header.kind = RouteType::Unicast;
        msg.attributes
            .push(RouteAttribute::Destination(route_address(&route.address)));
        msg.attributes.push(RouteAttribute::Oif(route.link_index));
        msg
    }

    /// Whether a dumped route is the host route for `route` in the main table
    pub fn route_matches(msg: &RouteMessage, route: &HostRoute) -> bool {
        if msg.header.destination_prefix_length != route.prefix_len() {
            return false;
        }

        let mut table = u32::from(msg.header.table);
        let mut destination = None;
        let mut oif = None;
        for attr in &msg.attributes {
            match attr {
                RouteAttribute::Table(t) => table = *t,
                RouteAttribute::Destination(RouteAddress::Inet(v4)) => {
                    destination = Some(IpAddr::V4(*v4))
                }
                RouteAttribute::Destination(RouteAddress::Inet6(v6)) => {
                    destination = Some(IpAddr::V6(*v6))
                }
                RouteAttribute::Oif(index) => oif = Some(*index),
                _ => {}
            }
        }

        table == u32::from(RouteHeader::RT_TABLE_MAIN)
            && destination == Some(route.address)
            && oif == Some(route.link_index)
    }

    /// Host routes in the kernel main table via rtnetlink
    ///
    /// Each operation runs its request/ack exchange on the blocking pool and
    /// gives up after `timeout`.
    #[derive(Debug, Clone, Copy)]
    pub struct NetlinkRouteBackend {
        timeout: Duration,
    }

    impl Default for NetlinkRouteBackend {
        fn default() -> Self {
            Self {
                timeout: DEFAULT_ROUTE_OP_TIMEOUT,
            }
        }
    }

    impl NetlinkRouteBackend {
        pub fn new(timeout: Duration) -> Self {
            Self { timeout }
        }

        async fn blocking<T, F>(&self, route: &HostRoute, op: F) -> Result<T>
        where
            F: FnOnce() -> io::Result<T> + Send + 'static,
            T: Send + 'static,
        {
            let task = tokio::task::spawn_blocking(op);
            match tokio::time::timeout(self.timeout, task).await {
                Err(_) => Err(NeighrouteError::RouteTimeout {
                    address: route.address,
                    link_index: route.link_index,
                }),
                Ok(Err(join)) => Err(NeighrouteError::route(route.address, route.link_index, join)),
                Ok(Ok(Err(e))) => Err(NeighrouteError::route(route.address, route.link_index, e)),
                Ok(Ok(Ok(value))) => Ok(value),
            }
        }
    }

    #[async_trait]
    impl RouteBackend for NetlinkRouteBackend {
        async fn exists(&self, route: &HostRoute) -> Result<bool> {
            let target = *route;
            self.blocking(route, move || {
                let mut msg = RouteMessage::default();
                msg.header.address_family = address_family(&target.address);
                let replies = request(
                    RouteNetlinkMessage::GetRoute(msg),
                    NLM_F_REQUEST | NLM_F_DUMP,
                )?;
                Ok(replies.iter().any(|reply| {
                    matches!(reply, RouteNetlinkMessage::NewRoute(r) if route_matches(r, &target))
                }))
            })
            .await
        }

        async fn add(&self, route: &HostRoute) -> Result<()> {
            let msg = host_route_message(route);
            self.blocking(route, move || {
                request(
                    RouteNetlinkMessage::NewRoute(msg),
                    NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
                )
                .map(|_| ())
            })
            .await
        }

        async fn delete(&self, route: &HostRoute) -> Result<()> {
            let msg = host_route_message(route);
            self.blocking(route, move || {
                request(
                    RouteNetlinkMessage::DelRoute(msg),
                    NLM_F_REQUEST | NLM_F_ACK,
                )
                .map(|_| ())
            })
            .await
        }
    }

}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Stub implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::{NeighborSource, NeighborStream};
    use crate::error::{NeighrouteError, Result};
    use crate::route_sync::{HostRoute, RouteBackend};
    use crate::types::NeighborEvent;
    use async_trait::async_trait;
    use std::time::Duration;

    pub const DEFAULT_ROUTE_OP_TIMEOUT: Duration = Duration::from_secs(5);

    fn unsupported() -> NeighrouteError {
        NeighrouteError::Netlink("netlink is only available on Linux".into())
    }

    pub fn link_index_by_name(name: &str) -> Result<u32> {
        Err(NeighrouteError::InterfaceNotFound(name.to_string()))
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct KernelNeighborSource;

    impl KernelNeighborSource {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl NeighborSource for KernelNeighborSource {
        async fn dump(&self, _scope: Option<u32>) -> Result<Vec<NeighborEvent>> {
            Err(unsupported())
        }

        async fn subscribe(&self) -> Result<NeighborStream> {
            Err(NeighrouteError::Subscription(unsupported().to_string()))
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct NetlinkRouteBackend;

    impl NetlinkRouteBackend {
        pub fn new(_timeout: Duration) -> Self {
            Self
        }
    }

    #[async_trait]
    impl RouteBackend for NetlinkRouteBackend {
        async fn exists(&self, _route: &HostRoute) -> Result<bool> {
            Err(unsupported())
        }

        async fn add(&self, _route: &HostRoute) -> Result<()> {
            Err(unsupported())
        }

        async fn delete(&self, _route: &HostRoute) -> Result<()> {
            Err(unsupported())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use unsupported::*;
