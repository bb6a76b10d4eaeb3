//! Reception of advertisements sent to a multicast group.

use core::fmt;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::interface::Interface;
use crate::message::{MalformedMessage, Message};
use crate::path::Path;
use crate::redirector::AdvertRedirector;

/// Error returned by [`AdvertListener::read_redirect`].
#[derive(Debug)]
pub enum ReadError {
    /// Receiving a datagram failed.
    Io(io::Error),
    /// A datagram was received, but it is not a valid advertisement.
    Malformed(MalformedMessage),
}

/// A socket joined to a multicast group on a set of interfaces, which hands out every received
/// advertisement as an [`AdvertRedirector`].
///
/// Redirectors send with the socket of the listener, so they share its outbound multicast
/// interface.
pub struct AdvertListener {
    sock: UdpSocket,
    group: SocketAddr,
    mifs: Vec<Interface>,
}

/// A datagram as received from the socket.
struct Datagram {
    len: usize,
    src: SocketAddr,
    /// Destination address of the IP packet, if known.
    dst: Option<IpAddr>,
    /// Index of the inbound interface, 0 if not known.
    if_index: u32,
}

impl AdvertListener {
    /// Bind a new `AdvertListener` on the port of `group`, and join `group` on the given
    /// interfaces.
    ///
    /// Interfaces which can't be used for the address family of the group, i.e. interfaces
    /// without IPv4 address for an IPv4 group, or without IPv6 link local address for an IPv6
    /// group, are skipped, as are interfaces on which the group could not be joined.
    ///
    /// This must be called from within a tokio runtime.
    pub fn bind(group: SocketAddr, mifs: Vec<Interface>) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(group), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        let bind_addr = match group {
            SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), group.port()),
            SocketAddr::V6(_) => {
                socket.set_only_v6(true)?;
                SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), group.port())
            }
        };
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;
        let sock: std::net::UdpSocket = socket.into();
        enable_packet_info(&sock, group)?;

        let mut joined = Vec::with_capacity(mifs.len());
        for ifi in mifs {
            let res = match group.ip() {
                IpAddr::V4(grp) => match ifi.ipv4.first() {
                    Some(addr) => sock.join_multicast_v4(&grp, addr),
                    None => continue,
                },
                IpAddr::V6(grp) => {
                    if ifi.ipv6_link_local().is_none() {
                        continue;
                    }
                    sock.join_multicast_v6(&grp, ifi.index)
                }
            };
            match res {
                Ok(()) => {
                    debug!(iface = %ifi.name, %group, "Joined multicast group on interface");
                    joined.push(ifi);
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!(
                        iface = %ifi.name,
                        %group,
                        "Multicast group on interface already in use, consider it to be joined"
                    );
                    joined.push(ifi);
                }
                Err(e) => {
                    warn!(
                        iface = %ifi.name,
                        %group,
                        err = %e,
                        "Failed to join multicast group on interface"
                    );
                }
            }
        }
        if joined.is_empty() {
            warn!(%group, "Multicast group is not joined on any interface");
        }

        // We don't care about our own advertisements.
        let res = match group {
            SocketAddr::V4(_) => sock.set_multicast_loop_v4(false),
            SocketAddr::V6(_) => sock.set_multicast_loop_v6(false),
        };
        if let Err(e) = res {
            warn!(err = %e, "Could not disable multicast loop");
        }

        let sock = UdpSocket::from_std(sock)?;
        info!(
            bind_address = %sock.local_addr()?,
            %group,
            interfaces = joined.len(),
            "Bound advertisement listener",
        );

        Ok(Self {
            sock,
            group,
            mifs: joined,
        })
    }

    /// Wait for and receive the next advertisement.
    ///
    /// The returned [`AdvertRedirector`] has the source of the datagram and its inbound interface
    /// as reverse path, and the destination of the datagram, with the port of the group, as
    /// forward path. `buf` must be large enough to hold a full datagram.
    pub async fn read_redirect(
        &self,
        buf: &mut [u8],
    ) -> Result<AdvertRedirector<'_, UdpSocket>, ReadError> {
        let dgram = recv_datagram(&self.sock, buf).await?;
        trace!(
            src = %dgram.src,
            if_index = dgram.if_index,
            bytes = dgram.len,
            "Received datagram"
        );

        let msg = Message::parse(&buf[..dgram.len])?;
        let dst = SocketAddr::new(dgram.dst.unwrap_or(self.group.ip()), 0);
        let path = Path::new(dgram.src, dst, dgram.if_index);

        Ok(AdvertRedirector::new(
            &self.sock,
            &self.mifs,
            self.group,
            path,
            msg,
        ))
    }

    /// The multicast group of this listener.
    pub fn group(&self) -> SocketAddr {
        self.group
    }

    /// The interfaces on which the group is joined.
    pub fn interfaces(&self) -> &[Interface] {
        &self.mifs
    }

    /// The local address of the underlying socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    /// Checks if the IP is an address of one of the interfaces of this listener.
    pub fn is_local_address(&self, ip: IpAddr) -> bool {
        self.mifs.iter().any(|ifi| ifi.has_address(ip))
    }
}

/// Ask the kernel to report the inbound interface and destination address of every datagram.
#[cfg(any(target_os = "linux", target_os = "macos"))]
fn enable_packet_info(sock: &std::net::UdpSocket, group: SocketAddr) -> io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};

    match group {
        #[cfg(target_os = "linux")]
        SocketAddr::V4(_) => setsockopt(sock, sockopt::Ipv4PacketInfo, &true),
        #[cfg(target_os = "macos")]
        SocketAddr::V4(_) => setsockopt(sock, sockopt::Ipv4RecvIf, &true)
            .and_then(|()| setsockopt(sock, sockopt::Ipv4RecvDstAddr, &true)),
        SocketAddr::V6(_) => setsockopt(sock, sockopt::Ipv6RecvPacketInfo, &true),
    }
    .map_err(io::Error::from)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn enable_packet_info(_sock: &std::net::UdpSocket, _group: SocketAddr) -> io::Result<()> {
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
async fn recv_datagram(sock: &UdpSocket, buf: &mut [u8]) -> io::Result<Datagram> {
    use std::os::fd::AsRawFd;
    use tokio::io::Interest;

    let fd = sock.as_raw_fd();
    sock.async_io(Interest::READABLE, || recv_packet_info(fd, &mut *buf))
        .await
}

/// Receive a single datagram together with its packet info control messages. The socket is non
/// blocking, so this fails with [`io::ErrorKind::WouldBlock`] if no datagram is queued.
#[cfg(any(target_os = "linux", target_os = "macos"))]
fn recv_packet_info(fd: std::os::fd::RawFd, buf: &mut [u8]) -> io::Result<Datagram> {
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrStorage};
    use std::io::IoSliceMut;

    let mut iov = [IoSliceMut::new(buf)];
    #[cfg(target_os = "linux")]
    let mut cmsg_buf = nix::cmsg_space!(nix::libc::in_pktinfo, nix::libc::in6_pktinfo);
    #[cfg(target_os = "macos")]
    let mut cmsg_buf = nix::cmsg_space!(
        nix::libc::sockaddr_dl,
        nix::libc::in_addr,
        nix::libc::in6_pktinfo
    );
    let msg = recvmsg::<SockaddrStorage>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())?;

    let mut dst = None;
    let mut if_index = 0;
    for cmsg in msg.cmsgs()? {
        match cmsg {
            #[cfg(target_os = "linux")]
            ControlMessageOwned::Ipv4PacketInfo(info) => {
                if_index = info.ipi_ifindex as u32;
                dst = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(
                    info.ipi_addr.s_addr,
                ))));
            }
            #[cfg(target_os = "macos")]
            ControlMessageOwned::Ipv4RecvIf(dl) => {
                if_index = u32::from(dl.sdl_index);
            }
            #[cfg(target_os = "macos")]
            ControlMessageOwned::Ipv4RecvDstAddr(addr) => {
                dst = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(addr.s_addr))));
            }
            ControlMessageOwned::Ipv6PacketInfo(info) => {
                if_index = info.ipi6_ifindex as u32;
                dst = Some(IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)));
            }
            _ => {}
        }
    }

    let src = msg
        .address
        .as_ref()
        .and_then(|addr| {
            if let Some(sin) = addr.as_sockaddr_in() {
                Some(SocketAddr::V4((*sin).into()))
            } else {
                addr.as_sockaddr_in6()
                    .map(|sin6| SocketAddr::V6((*sin6).into()))
            }
        })
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "datagram without source address")
        })?;

    Ok(Datagram {
        len: msg.bytes,
        src,
        dst,
        if_index,
    })
}

/// Without packet info only IPv6 sources tell the inbound interface, through their scope id.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
async fn recv_datagram(sock: &UdpSocket, buf: &mut [u8]) -> io::Result<Datagram> {
    let (len, src) = sock.recv_from(buf).await?;
    let if_index = match src {
        SocketAddr::V6(addr) => addr.scope_id(),
        SocketAddr::V4(_) => 0,
    };

    Ok(Datagram {
        len,
        src,
        dst: None,
        if_index,
    })
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => f.write_fmt(format_args!("failed to receive datagram: {e}")),
            Self::Malformed(e) => f.write_fmt(format_args!("malformed advertisement: {e}")),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Malformed(e) => Some(e),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MalformedMessage> for ReadError {
    fn from(value: MalformedMessage) -> Self {
        Self::Malformed(value)
    }
}
