//! ICMP echo probes over raw sockets
//!
//! Raw ICMP sockets need CAP_NET_RAW. Every probe opens its own socket,
//! sends `count` echo requests `interval` apart and counts matching replies
//! until all have answered or `timeout` expires.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Neighbor reachability probing
//! - AC-6: Least Privilege - Raw sockets require CAP_NET_RAW

use crate::error::{NeighrouteError, Result};
use crate::prober::{Pinger, ProbeConfig, ProbeReport};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;
use tracing::trace;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Type, code, checksum, identifier, sequence
const ECHO_HEADER_LEN: usize = 8;

const ECHO_PAYLOAD: &[u8] = b"neigh2route-probe";

/// Large enough for any echo reply we send plus an IPv4 header with options
const RECV_BUFFER_SIZE: usize = 1500;

/// Internet checksum (RFC 1071)
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build an echo request. ICMPv6 checksums are left to the kernel.
pub fn encode_echo_request(ipv6: bool, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ECHO_HEADER_LEN + payload.len());
    packet.push(if ipv6 {
        ICMPV6_ECHO_REQUEST
    } else {
        ICMP_ECHO_REQUEST
    });
    packet.push(0);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);

    if !ipv6 {
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Identifier and sequence of a received echo reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
}

/// Parse a datagram read from a raw ICMP socket
///
/// IPv4 raw sockets deliver the IP header too; it is skipped using its IHL.
/// Anything other than an echo reply yields `None`.
pub fn parse_echo_reply(ipv6: bool, datagram: &[u8]) -> Option<EchoReply> {
    let icmp = if ipv6 {
        datagram
    } else {
        let ihl = usize::from(datagram.first()? & 0x0f) * 4;
        datagram.get(ihl..)?
    };

    if icmp.len() < ECHO_HEADER_LEN {
        return None;
    }
    let expected = if ipv6 {
        ICMPV6_ECHO_REPLY
    } else {
        ICMP_ECHO_REPLY
    };
    if icmp[0] != expected || icmp[1] != 0 {
        return None;
    }

    Some(EchoReply {
        identifier: u16::from_be_bytes([icmp[4], icmp[5]]),
        sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
    })
}

/// Non-blocking raw ICMP socket registered with the tokio reactor
struct RawIcmpSocket {
    fd: AsyncFd<OwnedFd>,
}

impl RawIcmpSocket {
    fn open(ipv6: bool) -> io::Result<Self> {
        let (domain, protocol) = if ipv6 {
            (libc::AF_INET6, libc::IPPROTO_ICMPV6)
        } else {
            (libc::AF_INET, libc::IPPROTO_ICMP)
        };

        // SAFETY: plain socket(2) call; the descriptor is owned immediately
        let fd = unsafe {
            libc::socket(
                domain,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                protocol,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by socket(2) and is not owned elsewhere
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    async fn send_to(&self, packet: &[u8], dst: IpAddr) -> io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| sendto(inner.as_raw_fd(), packet, dst)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| recvfrom(inner.as_raw_fd(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn sendto(fd: RawFd, packet: &[u8], dst: IpAddr) -> io::Result<()> {
    let ret = match dst {
        IpAddr::V4(v4) => {
            // SAFETY: sockaddr_in is plain old data; all-zero is a valid value
            let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.octets());
            // SAFETY: buffer and address pointers are valid for the given lengths
            unsafe {
                libc::sendto(
                    fd,
                    packet.as_ptr() as *const libc::c_void,
                    packet.len(),
                    0,
                    &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        IpAddr::V6(v6) => {
            // SAFETY: sockaddr_in6 is plain old data; all-zero is a valid value
            let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_addr.s6_addr = v6.octets();
            // SAFETY: buffer and address pointers are valid for the given lengths
            unsafe {
                libc::sendto(
                    fd,
                    packet.as_ptr() as *const libc::c_void,
                    packet.len(),
                    0,
                    &sa as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn recvfrom(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
    // SAFETY: sockaddr_storage is plain old data; all-zero is a valid value
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    // SAFETY: buf and storage are valid for writes of the given lengths
    let ret = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut addr_len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((ret as usize, source_address(&storage)))
}

fn source_address(storage: &libc::sockaddr_storage) -> Option<IpAddr> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            // SAFETY: ss_family says the storage holds a sockaddr_in
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(IpAddr::V4(Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes())))
        }
        libc::AF_INET6 => {
            // SAFETY: ss_family says the storage holds a sockaddr_in6
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(IpAddr::V6(Ipv6Addr::from(sa.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

/// Privileged ICMP echo pinger
pub struct IcmpPinger {
    config: ProbeConfig,
    identifier: u16,
    sequence: AtomicU16,
}

impl IcmpPinger {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            identifier: (std::process::id() & 0xffff) as u16,
            sequence: AtomicU16::new(0),
        }
    }

    async fn run_probe(&self, address: IpAddr) -> io::Result<ProbeReport> {
        let ipv6 = address.is_ipv6();
        let socket = RawIcmpSocket::open(ipv6)?;
        let deadline = Instant::now() + self.config.timeout;

        let mut report = ProbeReport::default();
        let mut outstanding = HashSet::new();
        let mut next_send = Instant::now();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        while report.received < self.config.count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            if report.sent < self.config.count && now >= next_send {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                let packet = encode_echo_request(ipv6, self.identifier, sequence, ECHO_PAYLOAD);
                socket.send_to(&packet, address).await?;
                outstanding.insert(sequence);
                report.sent += 1;
                next_send = now + self.config.interval;
                continue;
            }

            let wake = if report.sent < self.config.count {
                next_send.min(deadline)
            } else {
                deadline
            };

            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    if from != Some(address) {
                        continue;
                    }
                    if let Some(reply) = parse_echo_reply(ipv6, &buf[..len]) {
                        if reply.identifier == self.identifier && outstanding.remove(&reply.sequence) {
                            report.received += 1;
                            trace!(ip = %address, seq = reply.sequence, "Echo reply");
                        }
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        Ok(report)
    }
}

impl Default for IcmpPinger {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn probe(&self, address: IpAddr) -> Result<ProbeReport> {
        self.run_probe(address)
            .await
            .map_err(|e| NeighrouteError::Probe {
                address,
                reason: e.to_string(),
            })
    }
}
