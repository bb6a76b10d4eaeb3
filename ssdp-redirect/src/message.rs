//! The advertisement message codec.
//!
//! SSDP advertisements are HTTP/1.1 requests without a body, carried as the payload of a single
//! UDP datagram. A [`Message`] is the structured form of such a request. It is either built
//! locally with [`Message::new`], or parsed from a received datagram with [`Message::parse`], and
//! rendered back to its wire form with [`Message::write_bytes`].

use core::fmt;

use bytes::{BufMut, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::Version;
use tracing::trace;

/// The request target used by advertisements, they don't address a resource.
pub const WILDCARD_PATH: &str = "*";

/// Maximum amount of headers accepted in a parsed message.
const MAX_HEADERS: usize = 64;

const CRLF: &[u8] = b"\r\n";

/// Error returned when a datagram does not hold a syntactically valid request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedMessage {
    /// The request line or header block ended before it was complete.
    Incomplete,
    /// Syntax error in the request line or in the header block.
    Syntax(httparse::Error),
    /// A header name or value which can't be represented.
    InvalidHeader,
    /// The Host header is present more than once.
    DuplicateHost,
    /// An HTTP/1.1 request without Host header.
    MissingHost,
}

/// Error returned when a [`Message`] can't be rendered to its wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationError {
    /// The method is empty or is not a valid HTTP token.
    InvalidMethod,
    /// The request target is empty or contains whitespace or control characters.
    InvalidPath,
    /// The host contains whitespace or control characters.
    InvalidHost,
}

/// An HTTP/1.1 request-like advertisement message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    method: String,
    path: String,
    headers: HeaderMap,
    host: String,
}

impl Message {
    /// Create a new advertisement `Message` for the given method and host.
    ///
    /// The request target is always [`WILDCARD_PATH`]. No validation is done on the method or
    /// host, an invalid value causes [`Message::write_bytes`] to fail later on.
    pub fn new(method: impl Into<String>, host: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method: method.into(),
            path: WILDCARD_PATH.to_string(),
            headers,
            host: host.into(),
        }
    }

    /// Parse a `Message` from the payload of a single datagram.
    ///
    /// The Host header is moved out of the header map into [`Message::host`]. Any bytes
    /// following the header block are ignored. HTTP/1.1 requests must carry exactly one Host
    /// header. HTTP/1.0 requests may omit it, but the resulting `Message` is always an HTTP/1.1
    /// message.
    pub fn parse(b: &[u8]) -> Result<Self, MalformedMessage> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        if req.parse(b)?.is_partial() {
            return Err(MalformedMessage::Incomplete);
        }
        // A complete parse always sets these.
        let (Some(method), Some(path)) = (req.method, req.path) else {
            return Err(MalformedMessage::Incomplete);
        };

        let mut host = None;
        let mut header_map = HeaderMap::with_capacity(req.headers.len());
        for header in req.headers.iter() {
            if header.name.eq_ignore_ascii_case(HOST.as_str()) {
                if host.is_some() {
                    return Err(MalformedMessage::DuplicateHost);
                }
                let value = std::str::from_utf8(header.value)
                    .map_err(|_| MalformedMessage::InvalidHeader)?;
                host = Some(value.to_string());
                continue;
            }
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| MalformedMessage::InvalidHeader)?;
            let value =
                HeaderValue::from_bytes(header.value).map_err(|_| MalformedMessage::InvalidHeader)?;
            header_map.append(name, value);
        }

        // HTTP/1.0 doesn't require a Host header.
        if host.is_none() && req.version != Some(0) {
            return Err(MalformedMessage::MissingHost);
        }

        trace!(method, path, headers = header_map.len(), "Parsed advertisement");

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: header_map,
            host: host.unwrap_or_default(),
        })
    }

    /// The request method, e.g. `NOTIFY` or `M-SEARCH`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The protocol version, this is always HTTP/1.1.
    pub fn version(&self) -> Version {
        Version::HTTP_11
    }

    /// The value of the Host header.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The headers of this message, excluding Host.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the headers of this message.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Calculates the size on the wire of this `Message`.
    pub fn wire_size(&self) -> usize {
        // "<method> <path> HTTP/1.1\r\n" and "Host: <host>\r\n".
        let mut size = self.method.len() + 1 + self.path.len() + 11 + 6 + self.host.len() + 2;
        for (name, value) in self.headers.iter().filter(|(name, _)| **name != HOST) {
            size += name.as_str().len() + 2 + value.len() + 2;
        }
        size + 2
    }

    /// Encode this `Message` in its HTTP/1.1 wire form.
    ///
    /// Header names are written in upper case, as is customary for SSDP. A Host entry in the
    /// header map is ignored, [`Message::host`] is always used instead.
    pub fn write_bytes(&self, dst: &mut BytesMut) -> Result<(), SerializationError> {
        if self.method.is_empty() || !self.method.bytes().all(is_token) {
            return Err(SerializationError::InvalidMethod);
        }
        if self.path.is_empty() || self.path.bytes().any(is_whitespace_or_control) {
            return Err(SerializationError::InvalidPath);
        }
        if self.host.bytes().any(is_whitespace_or_control) {
            return Err(SerializationError::InvalidHost);
        }

        dst.reserve(self.wire_size());
        dst.put_slice(self.method.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.path.as_bytes());
        dst.put_slice(b" HTTP/1.1");
        dst.put_slice(CRLF);

        dst.put_slice(b"Host: ");
        dst.put_slice(self.host.as_bytes());
        dst.put_slice(CRLF);

        for (name, value) in self.headers.iter() {
            if name == HOST {
                continue;
            }
            for b in name.as_str().bytes() {
                dst.put_u8(b.to_ascii_uppercase());
            }
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(CRLF);
        }
        dst.put_slice(CRLF);

        Ok(())
    }
}

/// Checks if a byte is a tchar as defined in RFC 9110, section 5.6.2.
fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_whitespace_or_control(b: u8) -> bool {
    b.is_ascii_whitespace() || b.is_ascii_control()
}

impl fmt::Display for MalformedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => f.write_str("incomplete request line or header block"),
            Self::Syntax(e) => f.write_fmt(format_args!("invalid request syntax: {e}")),
            Self::InvalidHeader => f.write_str("header name or value is not valid"),
            Self::DuplicateHost => f.write_str("too many Host headers"),
            Self::MissingHost => f.write_str("missing required Host header"),
        }
    }
}

impl std::error::Error for MalformedMessage {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Syntax(e) => Some(e),
            _ => None,
        }
    }
}

impl From<httparse::Error> for MalformedMessage {
    fn from(value: httparse::Error) -> Self {
        Self::Syntax(value)
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidMethod => "invalid method",
            Self::InvalidPath => "invalid request target",
            Self::InvalidHost => "invalid Host header",
        })
    }
}

impl std::error::Error for SerializationError {}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use http::header::{HeaderMap, HeaderName, HeaderValue};
    use http::Version;

    use super::{MalformedMessage, Message, SerializationError};

    fn notify_headers() -> HeaderMap {
        let mut hdr = HeaderMap::new();
        hdr.insert("NT", HeaderValue::from_static("upnp:rootdevice"));
        hdr
    }

    #[test]
    fn build_notify() {
        let msg = Message::new("NOTIFY", "239.255.255.250:1900", notify_headers());

        assert_eq!(msg.method(), "NOTIFY");
        assert_eq!(msg.path(), "*");
        assert_eq!(msg.version(), Version::HTTP_11);
        assert_eq!(msg.host(), "239.255.255.250:1900");
        assert_eq!(msg.headers().get("nt").unwrap(), "upnp:rootdevice");
    }

    #[test]
    fn encoding() {
        let msg = Message::new("NOTIFY", "239.255.255.250:1900", notify_headers());
        let mut buf = BytesMut::new();

        msg.write_bytes(&mut buf).unwrap();

        assert_eq!(
            &buf[..],
            b"NOTIFY * HTTP/1.1\r\nHost: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\n\r\n"
        );
        assert_eq!(buf.len(), msg.wire_size());
    }

    #[test]
    fn encoding_without_headers() {
        let msg = Message::new("M-SEARCH", "", HeaderMap::new());
        let mut buf = BytesMut::new();

        msg.write_bytes(&mut buf).unwrap();

        assert_eq!(&buf[..], b"M-SEARCH * HTTP/1.1\r\nHost: \r\n\r\n");
        assert_eq!(buf.len(), msg.wire_size());
    }

    #[test]
    fn encoding_skips_host_header_entry() {
        let mut hdr = notify_headers();
        hdr.insert("host", HeaderValue::from_static("10.0.0.1:1900"));
        let msg = Message::new("NOTIFY", "239.255.255.250:1900", hdr);
        let mut buf = BytesMut::new();

        msg.write_bytes(&mut buf).unwrap();

        assert_eq!(
            &buf[..],
            b"NOTIFY * HTTP/1.1\r\nHost: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\n\r\n"
        );
        assert_eq!(buf.len(), msg.wire_size());
    }

    #[test]
    fn encoding_rejects_invalid_fields() {
        let mut buf = BytesMut::new();

        let msg = Message::new("NOT IFY", "239.255.255.250:1900", HeaderMap::new());
        assert_eq!(msg.write_bytes(&mut buf), Err(SerializationError::InvalidMethod));

        let msg = Message::new("", "239.255.255.250:1900", HeaderMap::new());
        assert_eq!(msg.write_bytes(&mut buf), Err(SerializationError::InvalidMethod));

        let msg = Message::new("NOTIFY", "239.255.255.250:1900\r\nX: y", HeaderMap::new());
        assert_eq!(msg.write_bytes(&mut buf), Err(SerializationError::InvalidHost));
    }

    #[test]
    fn decoding() {
        let msg = Message::parse(
            b"NOTIFY * HTTP/1.1\r\n\
              HOST: 239.255.255.250:1900\r\n\
              CACHE-CONTROL: max-age=1800\r\n\
              NT: upnp:rootdevice\r\n\
              NTS: ssdp:alive\r\n\
              \r\n",
        )
        .unwrap();

        assert_eq!(msg.method(), "NOTIFY");
        assert_eq!(msg.path(), "*");
        assert_eq!(msg.host(), "239.255.255.250:1900");
        assert_eq!(msg.headers().len(), 3);
        assert!(msg.headers().get("host").is_none());
        assert_eq!(msg.headers().get("Cache-Control").unwrap(), "max-age=1800");
        assert_eq!(msg.headers().get("nts").unwrap(), "ssdp:alive");
    }

    #[test]
    fn decoding_http10_upgrades_version() {
        let msg = Message::parse(b"M-SEARCH * HTTP/1.0\r\nST: ssdp:all\r\n\r\n").unwrap();

        assert_eq!(msg.method(), "M-SEARCH");
        assert_eq!(msg.version(), Version::HTTP_11);
        assert_eq!(msg.host(), "");
    }

    #[test]
    fn decoding_ignores_trailing_bytes() {
        let msg = Message::parse(b"NOTIFY * HTTP/1.1\r\nHost: a\r\n\r\ntrailing garbage").unwrap();

        assert_eq!(msg.host(), "a");
        assert!(msg.headers().is_empty());
    }

    #[test]
    fn decoding_malformed() {
        assert!(matches!(
            Message::parse(b"not an http request"),
            Err(MalformedMessage::Syntax(_))
        ));
        assert_eq!(
            Message::parse(b"NOTIFY * HTTP/1.1\r\nHost: 239.255.255.250:1900\r\n"),
            Err(MalformedMessage::Incomplete)
        );
        assert_eq!(Message::parse(b""), Err(MalformedMessage::Incomplete));
        assert_eq!(
            Message::parse(b"NOTIFY * HTTP/1.1\r\nHost: a\r\nhost: b\r\n\r\n"),
            Err(MalformedMessage::DuplicateHost)
        );
        assert_eq!(
            Message::parse(b"NOTIFY * HTTP/1.1\r\nNT: upnp:rootdevice\r\n\r\n"),
            Err(MalformedMessage::MissingHost)
        );
    }

    #[test]
    fn round_trip_keeps_values_and_order() {
        let mut hdr = HeaderMap::new();
        hdr.append("USN", HeaderValue::from_static("uuid:1::upnp:rootdevice"));
        hdr.append("Ext", HeaderValue::from_static(""));
        hdr.append("x-multi", HeaderValue::from_static("first"));
        hdr.append("X-Multi", HeaderValue::from_static("second"));
        let msg = Message::new("NOTIFY", "[ff02::c]:1900", hdr);

        let mut buf = BytesMut::new();
        msg.write_bytes(&mut buf).unwrap();
        let parsed = Message::parse(&buf).unwrap();

        assert_eq!(parsed, msg);
        let multi = HeaderName::from_static("x-multi");
        assert_eq!(
            parsed.headers().get_all(&multi).iter().collect::<Vec<_>>(),
            ["first", "second"]
        );
    }
}
