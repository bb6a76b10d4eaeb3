use std::{io, net::SocketAddr};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use ssdp_redirect::{AdvertListener, AdvertRedirector, Conn, Interface, ReadError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Size of the receive buffer, large enough for any UDP datagram.
const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

/// Modifications made to the headers of every redirected advertisement.
#[derive(Debug, Clone, Default)]
pub struct HeaderEdits {
    set: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

impl HeaderEdits {
    /// Set a header, replacing all existing values. A previous edit for the same header is
    /// replaced.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        self.set.retain(|(existing, _)| *existing != name);
        self.set.push((name, value));
    }

    /// Remove all values of a header.
    pub fn remove(&mut self, name: HeaderName) {
        if !self.remove.contains(&name) {
            self.remove.push(name);
        }
    }

    /// Checks if there are no edits at all.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Apply the edits to the given headers. Removals are done first.
    pub fn apply(&self, hdr: &mut HeaderMap) {
        for name in &self.remove {
            hdr.remove(name);
        }
        for (name, value) in &self.set {
            hdr.insert(name.clone(), value.clone());
        }
    }
}

/// Redirect advertisements received by the listener until `cancel_token` is cancelled.
pub async fn run(listener: AdvertListener, edits: HeaderEdits, cancel_token: CancellationToken) {
    let mut buf = vec![0; MAX_DATAGRAM_SIZE];
    loop {
        let res = tokio::select! {
            res = listener.read_redirect(&mut buf) => res,
            _ = cancel_token.cancelled() => break,
        };
        let mut rdr = match res {
            Ok(rdr) => rdr,
            Err(ReadError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ReadError::Io(e)) => {
                warn!(group = %listener.group(), err = %e, "Failed to receive advertisement");
                continue;
            }
            Err(ReadError::Malformed(e)) => {
                debug!(group = %listener.group(), err = %e, "Dropping malformed advertisement");
                continue;
            }
        };

        redirect(&mut rdr, listener.interfaces(), listener.group(), &edits);
    }
    debug!(group = %listener.group(), "Stopped redirecting advertisements");
}

/// Redirect a single advertisement to `group`, on every interface in `mifs` except the one it
/// was received on. Advertisements received on an unknown interface, or sent from an address of
/// one of the interfaces in `mifs` (i.e. by ourselves), are not redirected.
///
/// Returns the amount of interfaces the advertisement was sent on.
pub fn redirect<C>(
    rdr: &mut AdvertRedirector<'_, C>,
    mifs: &[Interface],
    group: SocketAddr,
    edits: &HeaderEdits,
) -> usize
where
    C: Conn,
{
    let (src, inbound) = rdr.reverse_path();
    let src = src.clone();
    if mifs.iter().any(|ifi| ifi.has_address(src.ip())) {
        trace!(%src, "Ignoring advertisement sent by ourselves");
        return 0;
    }
    let Some(inbound) = inbound.map(|ifi| ifi.index) else {
        trace!(%src, "Ignoring advertisement received on unknown interface");
        return 0;
    };

    edits.apply(rdr.header());

    let mut sent = 0;
    for ifi in mifs.iter().filter(|ifi| ifi.index != inbound) {
        match rdr.write_to(group, Some(ifi)) {
            Ok(n) => {
                debug!(
                    %src,
                    iface = %ifi.name,
                    bytes = n,
                    method = rdr.message().method(),
                    "Redirected advertisement"
                );
                sent += 1;
            }
            Err(e) => {
                warn!(%src, iface = %ifi.name, err = %e, "Failed to redirect advertisement");
            }
        }
    }

    sent
}
