//! Redirection of SSDP advertisements across network interfaces.
//!
//! An advertisement received on one interface is parsed into a [`Message`], and wrapped in an
//! [`AdvertRedirector`] together with the path it took: the address it came from and the
//! interface it arrived on. The redirector can then re-emit the advertisement to a multicast
//! group, optionally through another outbound interface.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub mod conn;
pub mod interface;
pub mod listener;
pub mod message;
pub mod path;
pub mod redirector;

pub use conn::Conn;
pub use interface::{interface_by_index, multicast_interfaces, Interface};
pub use listener::{AdvertListener, ReadError};
pub use message::{MalformedMessage, Message, SerializationError};
pub use path::{Path, UdpAddr};
pub use redirector::{AdvertRedirector, WriteError};

/// The port used by SSDP.
pub const SSDP_PORT: u16 = 1900;
/// The IPv4 SSDP multicast group.
pub const SSDP_IPV4_GROUP: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), SSDP_PORT);
/// The IPv6 link local SSDP multicast group.
pub const SSDP_IPV6_LINK_LOCAL_GROUP: SocketAddr = SocketAddr::new(
    IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc)),
    SSDP_PORT,
);
