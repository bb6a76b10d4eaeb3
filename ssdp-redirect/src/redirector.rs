//! Redirection of received advertisements.

use core::fmt;
use std::{io, net::SocketAddr};

use bytes::BytesMut;
use http::HeaderMap;
use tracing::{debug, trace};

use crate::conn::Conn;
use crate::interface::{interface_by_index, Interface};
use crate::message::{Message, SerializationError};
use crate::path::{Path, UdpAddr};

/// Error returned by [`AdvertRedirector::write_to`].
#[derive(Debug)]
pub enum WriteError {
    /// The message could not be encoded, nothing was sent.
    Serialization(SerializationError),
    /// The underlying endpoint failed to change interface or to send the message.
    Transport(io::Error),
}

/// An `AdvertRedirector` re-emits a received SSDP advertisement, possibly on another interface.
///
/// It holds the advertisement together with its reverse path, i.e. the address it came from and
/// the interface it was received on, and borrows the endpoint used to send it.
pub struct AdvertRedirector<'a, C> {
    conn: &'a C,
    mifs: &'a [Interface],
    path: Path,
    msg: Message,
}

impl<'a, C> AdvertRedirector<'a, C>
where
    C: Conn,
{
    /// Create a new `AdvertRedirector` for a [`Message`] received over the given [`Path`].
    ///
    /// The port of the forward path is replaced by the port of `grp`. If the source of the path
    /// is an IPv6 link local address, it is qualified with the inbound interface, as found in
    /// `mifs`. The source is left as is if the inbound interface is not known.
    pub fn new(
        conn: &'a C,
        mifs: &'a [Interface],
        grp: SocketAddr,
        mut path: Path,
        msg: Message,
    ) -> Self {
        path.dst.set_port(grp.port());
        if path.src.is_ipv6_link_local() {
            match interface_by_index(mifs, path.if_index) {
                Some(ifi) => path.src.set_zone(ifi),
                None => {
                    debug!(
                        src = %path.src,
                        if_index = path.if_index,
                        "Inbound interface of link local source not found, leaving it unqualified"
                    );
                }
            }
        }

        Self {
            conn,
            mifs,
            path,
            msg,
        }
    }

    /// The headers which will be sent by [`AdvertRedirector::write_to`].
    pub fn header(&mut self) -> &mut HeaderMap {
        self.msg.headers_mut()
    }

    /// The advertisement being redirected.
    pub fn message(&self) -> &Message {
        &self.msg
    }

    /// Send the advertisement to `dst`.
    ///
    /// If `ifi` is set, the outbound multicast interface of the endpoint is switched to it first.
    /// This change is not undone afterwards. Without `ifi`, the interface currently selected on
    /// the endpoint is used.
    pub fn write_to(&self, dst: SocketAddr, ifi: Option<&Interface>) -> Result<usize, WriteError> {
        if let Some(ifi) = ifi {
            self.conn
                .set_multicast_interface(ifi)
                .map_err(WriteError::Transport)?;
        }

        let mut buf = BytesMut::with_capacity(self.msg.wire_size());
        self.msg.write_bytes(&mut buf)?;

        let n = self
            .conn
            .write_to(&buf, dst)
            .map_err(WriteError::Transport)?;
        trace!(
            %dst,
            iface = ifi.map(|ifi| ifi.name.as_str()),
            bytes = n,
            "Redirected advertisement"
        );

        Ok(n)
    }

    /// The destination of the advertisement.
    pub fn forward_path(&self) -> SocketAddr {
        self.path.dst
    }

    /// The source of the advertisement, and the interface it was received on, if that interface
    /// is known.
    pub fn reverse_path(&self) -> (&UdpAddr, Option<&'a Interface>) {
        (&self.path.src, interface_by_index(self.mifs, self.path.if_index))
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization(e) => f.write_fmt(format_args!("failed to encode message: {e}")),
            Self::Transport(e) => f.write_fmt(format_args!("failed to send message: {e}")),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            Self::Transport(e) => Some(e),
        }
    }
}

impl From<SerializationError> for WriteError {
    fn from(value: SerializationError) -> Self {
        Self::Serialization(value)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io, net::SocketAddr};

    use http::{HeaderMap, HeaderValue};

    use super::{AdvertRedirector, WriteError};
    use crate::conn::Conn;
    use crate::interface::Interface;
    use crate::message::{Message, SerializationError};
    use crate::path::Path;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        SetInterface(u32),
        WriteTo(Vec<u8>, SocketAddr),
    }

    /// A [`Conn`] which records all calls made to it.
    #[derive(Default)]
    struct RecordingConn {
        calls: RefCell<Vec<Call>>,
        fail_send: bool,
    }

    impl Conn for RecordingConn {
        fn set_multicast_interface(&self, ifi: &Interface) -> io::Result<()> {
            self.calls.borrow_mut().push(Call::SetInterface(ifi.index));
            Ok(())
        }

        fn write_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
            self.calls.borrow_mut().push(Call::WriteTo(buf.to_vec(), dst));
            if self.fail_send {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            } else {
                Ok(buf.len())
            }
        }
    }

    const GROUP: &str = "239.255.255.250:1900";

    fn notify() -> Message {
        let mut hdr = HeaderMap::new();
        hdr.insert("NT", HeaderValue::from_static("upnp:rootdevice"));
        Message::new("NOTIFY", GROUP, hdr)
    }

    fn mifs() -> Vec<Interface> {
        vec![Interface::new(1, "eth0"), Interface::new(7, "eth-test")]
    }

    fn path(src: &str, if_index: u32) -> Path {
        Path::new(
            src.parse().unwrap(),
            "239.255.255.250:0".parse().unwrap(),
            if_index,
        )
    }

    #[test]
    fn forward_path_uses_group_port() {
        let conn = RecordingConn::default();
        let mifs = mifs();

        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            GROUP.parse().unwrap(),
            path("192.168.1.20:41234", 1),
            notify(),
        );
        assert_eq!(rdr.forward_path(), GROUP.parse::<SocketAddr>().unwrap());

        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            "[ff02::c]:1901".parse().unwrap(),
            Path::new(
                "[fe80::1]:1900".parse().unwrap(),
                "[ff02::c]:5000".parse().unwrap(),
                7,
            ),
            notify(),
        );
        assert_eq!(rdr.forward_path().port(), 1901);
        assert_eq!(rdr.forward_path().ip(), "ff02::c".parse::<std::net::IpAddr>().unwrap());
    }

    #[test]
    fn reverse_path_link_local_gets_zone() {
        let conn = RecordingConn::default();
        let mifs = mifs();

        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            "[ff02::c]:1900".parse().unwrap(),
            path("[fe80::1234]:1900", 7),
            notify(),
        );

        let (src, ifi) = rdr.reverse_path();
        assert_eq!(src.zone(), Some("eth-test"));
        assert_eq!(src.ip(), "fe80::1234".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(src.port(), 1900);
        assert_eq!(ifi.map(|ifi| ifi.name.as_str()), Some("eth-test"));
    }

    #[test]
    fn reverse_path_ipv4_unchanged() {
        let conn = RecordingConn::default();
        let mifs = mifs();

        for if_index in [1, 7, 42] {
            let rdr = AdvertRedirector::new(
                &conn,
                &mifs,
                GROUP.parse().unwrap(),
                path("192.168.1.20:41234", if_index),
                notify(),
            );

            let (src, _) = rdr.reverse_path();
            assert_eq!(src.address(), "192.168.1.20:41234".parse().unwrap());
            assert_eq!(src.zone(), None);
        }
    }

    #[test]
    fn reverse_path_global_ipv6_has_no_zone() {
        let conn = RecordingConn::default();
        let mifs = mifs();

        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            "[ff05::c]:1900".parse().unwrap(),
            path("[2001:db8::1]:1900", 7),
            notify(),
        );

        assert_eq!(rdr.reverse_path().0.zone(), None);
    }

    #[test]
    fn reverse_path_unknown_interface() {
        let conn = RecordingConn::default();
        let mifs = mifs();

        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            "[ff02::c]:1900".parse().unwrap(),
            path("[fe80::1234]:1900", 3),
            notify(),
        );

        let (src, ifi) = rdr.reverse_path();
        assert_eq!(src.zone(), None);
        assert_eq!(src.address(), "[fe80::1234]:1900".parse().unwrap());
        assert!(ifi.is_none());
    }

    #[test]
    fn write_to_with_interface_override() {
        let conn = RecordingConn::default();
        let mifs = mifs();
        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            GROUP.parse().unwrap(),
            path("192.168.1.20:41234", 1),
            notify(),
        );

        let n = rdr.write_to(GROUP.parse().unwrap(), Some(&mifs[1])).unwrap();

        let expected =
            b"NOTIFY * HTTP/1.1\r\nHost: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\n\r\n";
        assert_eq!(n, expected.len());
        assert_eq!(
            *conn.calls.borrow(),
            [
                Call::SetInterface(7),
                Call::WriteTo(expected.to_vec(), GROUP.parse().unwrap()),
            ]
        );
    }

    #[test]
    fn write_to_without_interface_override() {
        let conn = RecordingConn::default();
        let mifs = mifs();
        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            GROUP.parse().unwrap(),
            path("192.168.1.20:41234", 1),
            notify(),
        );

        rdr.write_to(GROUP.parse().unwrap(), None).unwrap();
        rdr.write_to(GROUP.parse().unwrap(), None).unwrap();

        let calls = conn.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|call| matches!(call, Call::WriteTo(..))));
    }

    #[test]
    fn write_to_serialization_failure_switches_but_does_not_send() {
        let conn = RecordingConn::default();
        let mifs = mifs();
        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            GROUP.parse().unwrap(),
            path("192.168.1.20:41234", 1),
            Message::new("NOTIFY", "bad host\r\n", HeaderMap::new()),
        );

        let res = rdr.write_to(GROUP.parse().unwrap(), Some(&mifs[0]));

        assert!(matches!(
            res,
            Err(WriteError::Serialization(SerializationError::InvalidHost))
        ));
        assert_eq!(*conn.calls.borrow(), [Call::SetInterface(1)]);
    }

    #[test]
    fn write_to_propagates_transport_error() {
        let conn = RecordingConn {
            fail_send: true,
            ..Default::default()
        };
        let mifs = mifs();
        let rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            GROUP.parse().unwrap(),
            path("192.168.1.20:41234", 1),
            notify(),
        );

        match rdr.write_to(GROUP.parse().unwrap(), None) {
            Err(WriteError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn header_changes_are_sent() {
        let conn = RecordingConn::default();
        let mifs = mifs();
        let mut rdr = AdvertRedirector::new(
            &conn,
            &mifs,
            GROUP.parse().unwrap(),
            path("192.168.1.20:41234", 1),
            notify(),
        );

        rdr.header().remove("nt");
        rdr.header()
            .insert("CACHE-CONTROL", HeaderValue::from_static("max-age=60"));
        rdr.write_to(GROUP.parse().unwrap(), None).unwrap();

        let calls = conn.calls.borrow();
        let Call::WriteTo(sent, _) = &calls[0] else {
            panic!("expected a send");
        };
        let sent = Message::parse(sent).unwrap();
        assert!(sent.headers().get("nt").is_none());
        assert_eq!(sent.headers().get("cache-control").unwrap(), "max-age=60");
        assert_eq!(rdr.message().headers().len(), 1);
    }
}
