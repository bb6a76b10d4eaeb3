//! Multicast capable network interfaces.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::trace;

use crate::path::ipv6_link_local;

/// A network interface which can be used to send and receive multicast advertisements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Index of the interface, as assigned by the OS.
    pub index: u32,
    /// Name of the interface.
    pub name: String,
    /// IPv4 addresses configured on the interface.
    pub ipv4: Vec<Ipv4Addr>,
    /// IPv6 addresses configured on the interface.
    pub ipv6: Vec<Ipv6Addr>,
}

impl Interface {
    /// Create a new `Interface` without any addresses.
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            ipv4: Vec::new(),
            ipv6: Vec::new(),
        }
    }

    /// Checks if this interface has at least one IPv4 address.
    pub fn has_ipv4(&self) -> bool {
        !self.ipv4.is_empty()
    }

    /// Get the first IPv6 link local address of this interface, if there is one.
    pub fn ipv6_link_local(&self) -> Option<Ipv6Addr> {
        self.ipv6.iter().find(|ip| ipv6_link_local(ip)).copied()
    }

    /// Checks if the IP is configured on this interface.
    pub fn has_address(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ip) => self.ipv4.contains(&ip),
            IpAddr::V6(ip) => self.ipv6.contains(&ip),
        }
    }
}

/// Look up the [`Interface`] with the given index.
pub fn interface_by_index(mifs: &[Interface], index: u32) -> Option<&Interface> {
    mifs.iter().find(|ifi| ifi.index == index)
}

/// Get a list of all interfaces which are up and multicast capable, loopback interfaces excluded.
pub fn multicast_interfaces() -> Vec<Interface> {
    netdev::get_interfaces()
        .into_iter()
        .filter(|nic| nic.is_up() && nic.is_multicast() && !nic.is_loopback())
        .map(|nic| {
            trace!(index = nic.index, name = %nic.name, "Found multicast interface");
            Interface {
                index: nic.index,
                ipv4: nic.ipv4.iter().map(|net| net.addr()).collect(),
                ipv6: nic.ipv6.iter().map(|net| net.addr()).collect(),
                name: nic.name,
            }
        })
        .collect()
}
