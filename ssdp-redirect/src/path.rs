//! Routing metadata of a received advertisement.

use core::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::interface::Interface;

/// A UDP address, optionally qualified by a zone.
///
/// IPv6 link local addresses are only meaningful together with the interface they are valid on.
/// The zone holds the name of that interface, and the scope id of the address is kept in sync
/// with its index, so the address can be used as a destination directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UdpAddr {
    addr: SocketAddr,
    zone: Option<String>,
}

/// The forward and reverse path of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub(crate) src: UdpAddr,
    pub(crate) dst: SocketAddr,
    pub(crate) if_index: u32,
}

impl UdpAddr {
    /// Create a new `UdpAddr` without zone.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, zone: None }
    }

    /// The socket address.
    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// The IP address.
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The zone of this address, if any.
    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// Checks if this is an IPv6 link local unicast address, i.e. part of fe80::/10.
    pub fn is_ipv6_link_local(&self) -> bool {
        match self.addr {
            SocketAddr::V6(addr) => ipv6_link_local(addr.ip()),
            SocketAddr::V4(_) => false,
        }
    }

    /// Qualify this address with the given [`Interface`].
    ///
    /// This only has an effect on IPv6 addresses, IPv4 addresses don't have a zone.
    pub(crate) fn set_zone(&mut self, ifi: &Interface) {
        if let SocketAddr::V6(ref mut addr) = self.addr {
            addr.set_scope_id(ifi.index);
            self.zone = Some(ifi.name.clone());
        }
    }
}

impl Path {
    /// Create a new `Path` for a datagram received from `src`, destined to `dst`, on the
    /// interface with index `if_index`.
    pub fn new(src: SocketAddr, dst: SocketAddr, if_index: u32) -> Self {
        Self {
            src: UdpAddr::new(src),
            dst,
            if_index,
        }
    }

    /// The source of the datagram.
    pub fn src(&self) -> &UdpAddr {
        &self.src
    }

    /// The destination of the datagram.
    pub fn dst(&self) -> SocketAddr {
        self.dst
    }

    /// Index of the interface the datagram was received on.
    pub fn if_index(&self) -> u32 {
        self.if_index
    }
}

/// Checks if the address is in fe80::/10.
pub(crate) fn ipv6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

impl From<SocketAddr> for UdpAddr {
    fn from(value: SocketAddr) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for UdpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.addr, &self.zone) {
            (SocketAddr::V6(addr), Some(zone)) => {
                f.write_fmt(format_args!("[{}%{zone}]:{}", addr.ip(), addr.port()))
            }
            _ => fmt::Display::fmt(&self.addr, f),
        }
    }
}
