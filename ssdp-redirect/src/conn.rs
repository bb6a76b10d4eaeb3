use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

use socket2::SockRef;

use crate::interface::Interface;

/// A network endpoint which can send datagrams, and of which the outbound multicast interface
/// can be changed.
///
/// The outbound multicast interface is state of the endpoint itself. Once changed, it applies to
/// every subsequent send, by any user of the endpoint, until it is changed again. Users which
/// send on different interfaces concurrently must therefore serialize their sends, or use a
/// dedicated endpoint each.
pub trait Conn {
    /// Use the given [`Interface`] for subsequent multicast sends.
    fn set_multicast_interface(&self, ifi: &Interface) -> io::Result<()>;

    /// Send a single datagram to the destination, returning the amount of bytes sent.
    fn write_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize>;
}

impl Conn for UdpSocket {
    fn set_multicast_interface(&self, ifi: &Interface) -> io::Result<()> {
        set_multicast_if(SockRef::from(self), self.local_addr()?, ifi)
    }

    fn write_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
        self.send_to(buf, dst)
    }
}

/// Sends don't wait for the socket to become writable, if the send buffer is full an error with
/// kind [`io::ErrorKind::WouldBlock`] is returned.
impl Conn for tokio::net::UdpSocket {
    fn set_multicast_interface(&self, ifi: &Interface) -> io::Result<()> {
        set_multicast_if(SockRef::from(self), self.local_addr()?, ifi)
    }

    fn write_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
        self.try_send_to(buf, dst)
    }
}

fn set_multicast_if(sock: SockRef<'_>, local: SocketAddr, ifi: &Interface) -> io::Result<()> {
    match local {
        SocketAddr::V4(_) => {
            let Some(addr) = ifi.ipv4.first() else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("interface {} has no IPv4 address", ifi.name),
                ));
            };
            sock.set_multicast_if_v4(addr)
        }
        SocketAddr::V6(_) => sock.set_multicast_if_v6(ifi.index),
    }
}
