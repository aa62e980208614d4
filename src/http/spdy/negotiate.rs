//! Protocol negotiation
//!
//! Decides, once per new TLS connection, whether it speaks SPDY or falls
//! back to HTTP/1.1. The decision comes from the ALPN extension of the
//! handshake where possible:
//!
//! 1. A resumed TLS session reuses the outcome cached for its session id.
//! 2. An ALPN outcome recorded during the handshake is used directly, with
//!    nothing read from the transport.
//! 3. Otherwise the peer never used the extension. The server makes one
//!    speculative read of at most `speculative_read_size` bytes; any bytes
//!    that arrive while still unresolved are taken as HTTP/1.1 and pushed
//!    back so the fallback engine sees them first, exactly once and in
//!    order.
//!
//! Negotiation is edge triggered: [`Negotiator::negotiate`] returns
//! [`Progress::Pending`] when the probe finds nothing to read, and
//! [`Negotiator::resume`] retries once the transport is readable again.

use super::config::ConnectionConfig;
use super::connection::{Connection, Role};
use super::error::{Error, Result};
use crate::http::{PollEvents, PushbackSession, SessionOps};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Application protocols this engine can end up speaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Spdy31,
    Spdy3,
    /// Fallback to an external HTTP/1.1 engine
    Http11,
}

impl Protocol {
    /// ALPN token
    pub fn token(&self) -> &'static str {
        match self {
            Protocol::Spdy31 => "spdy/3.1",
            Protocol::Spdy3 => "spdy/3",
            Protocol::Http11 => "http/1.1",
        }
    }

    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"spdy/3.1" => Some(Protocol::Spdy31),
            b"spdy/3" => Some(Protocol::Spdy3),
            b"http/1.1" => Some(Protocol::Http11),
            _ => None,
        }
    }

    pub fn is_spdy(&self) -> bool {
        !matches!(self, Protocol::Http11)
    }

    /// spdy/3.1 adds a connection-level flow control window
    pub fn has_connection_flow_control(&self) -> bool {
        matches!(self, Protocol::Spdy31)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Split an ALPN wire list into its tokens
///
/// A truncated trailing entry is dropped.
pub fn decode_alpn_list(wire: &[u8]) -> Vec<&[u8]> {
    let mut tokens = Vec::new();
    let mut rest = wire;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || tail.len() < len {
            break;
        }
        tokens.push(&tail[..len]);
        rest = &tail[len..];
    }
    tokens
}

/// Encode tokens as a length-prefixed ALPN wire list
pub fn encode_alpn_list(protocols: &[Protocol]) -> Vec<u8> {
    let mut wire = Vec::new();
    for protocol in protocols {
        let token = protocol.token().as_bytes();
        wire.push(token.len() as u8);
        wire.extend_from_slice(token);
    }
    wire
}

/// Local protocol preference, most preferred first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSelector {
    priority: Vec<Protocol>,
}

impl Default for ProtocolSelector {
    fn default() -> Self {
        ProtocolSelector {
            priority: vec![Protocol::Spdy31, Protocol::Spdy3, Protocol::Http11],
        }
    }
}

impl ProtocolSelector {
    pub fn new(priority: Vec<Protocol>) -> Self {
        let mut unique = Vec::with_capacity(priority.len());
        for protocol in priority {
            if !unique.contains(&protocol) {
                unique.push(protocol);
            }
        }
        ProtocolSelector { priority: unique }
    }

    pub fn priority(&self) -> &[Protocol] {
        &self.priority
    }

    /// First local protocol the peer also offers, else HTTP/1.1
    pub fn select(&self, offered: &[Protocol]) -> Protocol {
        self.priority
            .iter()
            .copied()
            .find(|p| offered.contains(p))
            .unwrap_or(Protocol::Http11)
    }

    /// [`select`](Self::select) over a raw ALPN list
    ///
    /// Also returns the matching token inside `offered`, which is what the
    /// OpenSSL selection callback must hand back; `None` when nothing
    /// matched.
    pub fn select_wire<'a>(&self, offered: &'a [u8]) -> (Protocol, Option<&'a [u8]>) {
        let tokens = decode_alpn_list(offered);
        for protocol in &self.priority {
            let wanted = protocol.token().as_bytes();
            if let Some(token) = tokens.iter().find(|t| **t == wanted) {
                return (*protocol, Some(*token));
            }
        }
        (Protocol::Http11, None)
    }

    /// The client's ALPN offer
    pub fn alpn_wire(&self) -> Vec<u8> {
        encode_alpn_list(&self.priority)
    }
}

/// Transport that reports the outcome of its TLS handshake
pub trait AlpnSession: SessionOps {
    /// Protocol chosen through ALPN, if the handshake resolved one
    fn selected_protocol(&self) -> Option<Protocol>;

    /// TLS session id, if any
    fn session_id(&self) -> Option<Vec<u8>>;

    /// Whether the handshake resumed an earlier session
    fn session_reused(&self) -> bool;
}

/// Outcomes remembered per TLS session id
#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    entries: Arc<Mutex<HashMap<Vec<u8>, Protocol>>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        ResolutionCache::default()
    }

    pub fn get(&self, session_id: &[u8]) -> Option<Protocol> {
        self.entries.lock().ok()?.get(session_id).copied()
    }

    pub fn insert(&self, session_id: Vec<u8>, protocol: Protocol) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(session_id, protocol);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a negotiated transport goes next
pub enum Negotiated<S: SessionOps> {
    /// SPDY connection, seeded with any bytes read while negotiating
    Spdy(Connection<S>),
    /// HTTP/1.1 transport; the probed bytes are read back first
    Http11(PushbackSession<S>),
}

impl<S: SessionOps> Negotiated<S> {
    pub fn protocol(&self) -> Protocol {
        match self {
            Negotiated::Spdy(connection) => connection.protocol(),
            Negotiated::Http11(_) => Protocol::Http11,
        }
    }
}

impl<S: SessionOps> fmt::Debug for Negotiated<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Negotiated::Spdy(connection) => f.debug_tuple("Spdy").field(connection).finish(),
            Negotiated::Http11(session) => f
                .debug_struct("Http11")
                .field("pushed_back", &session.pending())
                .finish(),
        }
    }
}

/// Result of one negotiation step
pub enum Progress<S: AlpnSession> {
    Resolved(Negotiated<S>),
    /// Nothing to read yet; call [`Negotiator::resume`] when readable
    Pending(PendingNegotiation<S>),
}

/// A negotiation waiting for its speculative read
pub struct PendingNegotiation<S: AlpnSession> {
    session: S,
}

impl<S: AlpnSession> PendingNegotiation<S> {
    pub fn get_ref(&self) -> &S {
        &self.session
    }

    /// Give up on negotiating and take the transport back
    pub fn into_inner(self) -> S {
        self.session
    }
}

/// Resolves new transports to SPDY or HTTP/1.1
///
/// Clones share one resolution cache.
#[derive(Debug, Clone)]
pub struct Negotiator {
    role: Role,
    config: ConnectionConfig,
    selector: ProtocolSelector,
    alpn_available: bool,
    require_spdy: bool,
    cache: ResolutionCache,
}

impl Negotiator {
    pub fn new(role: Role, config: ConnectionConfig) -> Self {
        Negotiator {
            role,
            config,
            selector: ProtocolSelector::default(),
            alpn_available: crate::http::tls::alpn_supported(),
            require_spdy: false,
            cache: ResolutionCache::new(),
        }
    }

    /// Local protocol preference; should match the TLS configuration
    pub fn selector(mut self, selector: ProtocolSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Override the ALPN capability probe
    pub fn alpn_available(mut self, available: bool) -> Self {
        self.alpn_available = available;
        self
    }

    /// Fail instead of falling back to HTTP/1.1
    pub fn require_spdy(mut self) -> Self {
        self.require_spdy = true;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Start negotiating on a transport whose handshake has completed
    pub fn negotiate<S: AlpnSession>(&self, session: S) -> Result<Progress<S>> {
        if !self.alpn_available {
            warn!("ALPN unavailable, cannot negotiate SPDY");
            return Err(Error::NegotiationUnavailable);
        }

        if session.session_reused() {
            let cached = session.session_id().and_then(|id| self.cache.get(&id));
            if let Some(protocol) = cached {
                debug!(protocol = %protocol, "reusing negotiated protocol of resumed session");
                return self.resolve(session, protocol, &[]).map(Progress::Resolved);
            }
        }

        if let Some(protocol) = session.selected_protocol() {
            if let Some(id) = session.session_id() {
                self.cache.insert(id, protocol);
            }
            debug!(protocol = %protocol, role = %self.role, "ALPN resolved");
            return self.resolve(session, protocol, &[]).map(Progress::Resolved);
        }

        if self.role.is_client() {
            // The server speaks only after the request, so there is nothing
            // to probe for
            debug!("server did not select a protocol, falling back");
            return self.resolve(session, Protocol::Http11, &[]).map(Progress::Resolved);
        }

        self.resume(PendingNegotiation { session })
    }

    /// Retry the speculative read of a pending negotiation
    pub fn resume<S: AlpnSession>(&self, pending: PendingNegotiation<S>) -> Result<Progress<S>> {
        let mut session = pending.session;

        let readable = session.poll(PollEvents::Read, Some(Duration::ZERO))?;
        if !readable {
            trace!("speculative read found nothing, waiting");
            return Ok(Progress::Pending(PendingNegotiation { session }));
        }

        let mut probe = vec![0u8; self.config.speculative_read_size];
        let n = match session.read(&mut probe) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => n,
            Err(e) if e.is_would_block() => {
                return Ok(Progress::Pending(PendingNegotiation { session }));
            }
            Err(e) => return Err(e.into()),
        };
        let probe = &probe[..n];

        match session.selected_protocol() {
            Some(protocol) => {
                debug!(protocol = %protocol, preread = n, "resolved during speculative read");
                self.resolve(session, protocol, probe).map(Progress::Resolved)
            }
            None => {
                // Bytes before any resolution are taken to be plaintext HTTP/1.1
                debug!(preread = n, "unresolved bytes on the wire, assuming http/1.1");
                self.resolve(session, Protocol::Http11, probe).map(Progress::Resolved)
            }
        }
    }

    /// Negotiate, waiting for the transport between steps
    pub fn negotiate_blocking<S: AlpnSession>(&self, session: S, timeout: Duration) -> Result<Negotiated<S>> {
        let deadline = Instant::now() + timeout;
        let mut progress = self.negotiate(session)?;
        loop {
            let pending = match progress {
                Progress::Resolved(negotiated) => return Ok(negotiated),
                Progress::Pending(pending) => pending,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !pending.session.poll(PollEvents::Read, Some(remaining))? {
                debug!("negotiation timed out");
                return Err(Error::Timeout);
            }
            progress = self.resume(pending)?;
        }
    }

    fn resolve<S: AlpnSession>(&self, session: S, protocol: Protocol, preread: &[u8]) -> Result<Negotiated<S>> {
        if protocol.is_spdy() {
            let connection = Connection::with_preread(session, self.role, protocol, self.config.clone(), preread)?;
            return Ok(Negotiated::Spdy(connection));
        }
        if self.require_spdy {
            return Err(Error::SpdyRequired);
        }
        Ok(Negotiated::Http11(PushbackSession::new(session, preread)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::spdy::codec::{FrameCodec, FrameDecoder};
    use crate::http::spdy::frames::{Frame, PingFrame};
    use bytes::BytesMut;
    use std::io::Read as _;

    /// Transport whose ALPN outcome and input are set by the test
    #[derive(Clone, Default)]
    struct Scripted {
        selected: Arc<Mutex<Option<Protocol>>>,
        input: Arc<Mutex<BytesMut>>,
        output: Arc<Mutex<Vec<u8>>>,
        id: Option<Vec<u8>>,
        reused: bool,
        reads: Arc<Mutex<usize>>,
    }

    impl Scripted {
        fn selecting(protocol: Option<Protocol>) -> Self {
            let scripted = Scripted::default();
            *scripted.selected.lock().unwrap() = protocol;
            scripted
        }

        fn push(&self, bytes: &[u8]) {
            self.input.lock().unwrap().extend_from_slice(bytes);
        }
    }

    impl SessionOps for Scripted {
        fn poll(&self, events: PollEvents, _timeout: Option<Duration>) -> crate::http::Result<bool> {
            Ok(events == PollEvents::Write || !self.input.lock().unwrap().is_empty())
        }

        fn read(&mut self, buf: &mut [u8]) -> crate::http::Result<usize> {
            *self.reads.lock().unwrap() += 1;
            let mut input = self.input.lock().unwrap();
            if input.is_empty() {
                return Err(crate::http::Error::Io(std::io::ErrorKind::WouldBlock.into()));
            }
            let n = buf.len().min(input.len());
            buf[..n].copy_from_slice(&input.split_to(n));
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> crate::http::Result<usize> {
            self.output.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn close(&mut self) -> crate::http::Result<()> {
            Ok(())
        }
    }

    impl AlpnSession for Scripted {
        fn selected_protocol(&self) -> Option<Protocol> {
            *self.selected.lock().unwrap()
        }

        fn session_id(&self) -> Option<Vec<u8>> {
            self.id.clone()
        }

        fn session_reused(&self) -> bool {
            self.reused
        }
    }

    /// Adapter so a pushback session can be drained with `std::io::Read`
    struct Reader<S: SessionOps>(PushbackSession<S>);

    impl<S: SessionOps> std::io::Read for Reader<S> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.is_would_block() => Ok(0),
                Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
            }
        }
    }

    fn server() -> Negotiator {
        Negotiator::new(Role::Server, ConnectionConfig::default()).alpn_available(true)
    }

    fn tokens(list: &[&str]) -> Vec<Protocol> {
        list.iter().filter_map(|t| Protocol::from_token(t.as_bytes())).collect()
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = ProtocolSelector::default();
        for _ in 0..10 {
            assert_eq!(selector.select(&tokens(&["http/1.1"])), Protocol::Http11);
            assert_eq!(selector.select(&tokens(&["spdy/3", "http/1.1"])), Protocol::Spdy3);
            assert_eq!(selector.select(&tokens(&["spdy/3", "spdy/3.1"])), Protocol::Spdy31);
        }
        assert_eq!(selector.select(&[]), Protocol::Http11);
    }

    #[test]
    fn test_select_wire_returns_peer_token() {
        let selector = ProtocolSelector::default();
        let offered = b"\x02h2\x06spdy/3\x08http/1.1";
        let (protocol, token) = selector.select_wire(offered);
        assert_eq!(protocol, Protocol::Spdy3);
        assert_eq!(token, Some(&b"spdy/3"[..]));

        let (protocol, token) = selector.select_wire(b"\x02h2");
        assert_eq!(protocol, Protocol::Http11);
        assert_eq!(token, None);

        let spdy_only = ProtocolSelector::new(vec![Protocol::Spdy31, Protocol::Spdy31]);
        assert_eq!(spdy_only.priority(), &[Protocol::Spdy31]);
        assert_eq!(spdy_only.select_wire(b"\x08http/1.1"), (Protocol::Http11, None));
    }

    #[test]
    fn test_alpn_list_encoding() {
        assert_eq!(
            ProtocolSelector::default().alpn_wire(),
            b"\x08spdy/3.1\x06spdy/3\x08http/1.1".to_vec()
        );
        assert_eq!(decode_alpn_list(b"\x06spdy/3\x09http/1"), vec![&b"spdy/3"[..]]);
        assert!(decode_alpn_list(b"").is_empty());
    }

    #[test]
    fn test_unavailable_fails_without_reading() {
        let session = Scripted::default();
        session.push(b"GET / HTTP/1.1\r\n");
        let negotiator = Negotiator::new(Role::Server, ConnectionConfig::default()).alpn_available(false);
        assert!(matches!(
            negotiator.negotiate(session.clone()),
            Err(Error::NegotiationUnavailable)
        ));
        assert_eq!(*session.reads.lock().unwrap(), 0);
    }

    #[test]
    fn test_alpn_spdy_builds_connection() {
        let session = Scripted::selecting(Some(Protocol::Spdy31));
        session.push(b"not read yet");
        match server().negotiate(session.clone()).unwrap() {
            Progress::Resolved(Negotiated::Spdy(connection)) => {
                assert_eq!(connection.protocol(), Protocol::Spdy31);
                assert_eq!(connection.role(), Role::Server);
            }
            _ => panic!("expected a SPDY connection"),
        }
        assert_eq!(*session.reads.lock().unwrap(), 0);
    }

    #[test]
    fn test_alpn_http11_hands_off_untouched() {
        let session = Scripted::selecting(Some(Protocol::Http11));
        session.push(b"GET / HTTP/1.1\r\n\r\n");
        match server().negotiate(session.clone()).unwrap() {
            Progress::Resolved(Negotiated::Http11(transport)) => assert_eq!(transport.pending(), 0),
            _ => panic!("expected fallback"),
        }
        assert_eq!(*session.reads.lock().unwrap(), 0);
    }

    #[test]
    fn test_pushback_with_no_preread() {
        let session = Scripted::selecting(Some(Protocol::Http11));
        let request = b"GET /plain HTTP/1.1\r\nHost: a\r\n\r\n";
        session.push(request);
        let transport = match server().negotiate(session).unwrap() {
            Progress::Resolved(Negotiated::Http11(transport)) => transport,
            _ => panic!("expected fallback"),
        };
        let mut seen = Vec::new();
        Reader(transport).read_to_end(&mut seen).unwrap();
        assert_eq!(seen, request.to_vec());
    }

    #[test]
    fn test_speculative_read_pushes_back_exact_bytes() {
        let session = Scripted::selecting(None);
        let negotiator = server();

        let pending = match negotiator.negotiate(session.clone()).unwrap() {
            Progress::Pending(pending) => pending,
            _ => panic!("nothing to read yet"),
        };

        let request: Vec<u8> = b"GET /long HTTP/1.1\r\nHost: example.com\r\nUser-Agent: "
            .iter()
            .copied()
            .chain(std::iter::repeat(b'x').take(300))
            .chain(b"\r\n\r\n".iter().copied())
            .collect();
        session.push(&request);

        let transport = match negotiator.resume(pending).unwrap() {
            Progress::Resolved(Negotiated::Http11(transport)) => transport,
            _ => panic!("expected fallback"),
        };
        assert_eq!(transport.pending(), 100);

        let mut seen = Vec::new();
        Reader(transport).read_to_end(&mut seen).unwrap();
        assert_eq!(seen, request);
    }

    #[test]
    fn test_late_spdy_resolution_seeds_connection() {
        let session = Scripted::selecting(None);
        let negotiator = server();
        let pending = match negotiator.negotiate(session.clone()).unwrap() {
            Progress::Pending(pending) => pending,
            _ => panic!("nothing to read yet"),
        };

        session.push(&FrameCodec::encode(&Frame::Ping(PingFrame { id: 7 })));
        *session.selected.lock().unwrap() = Some(Protocol::Spdy3);

        let mut connection = match negotiator.resume(pending).unwrap() {
            Progress::Resolved(Negotiated::Spdy(connection)) => connection,
            _ => panic!("expected a SPDY connection"),
        };
        assert!(connection.process().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.feed(&session.output.lock().unwrap());
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }
        assert!(matches!(frames[0], Frame::Settings(_)));
        assert_eq!(frames[1], Frame::Ping(PingFrame { id: 7 }));
    }

    #[test]
    fn test_resumed_session_uses_cache() {
        let negotiator = server();
        let mut first = Scripted::selecting(Some(Protocol::Spdy3));
        first.id = Some(vec![1, 2, 3]);
        assert!(matches!(
            negotiator.negotiate(first).unwrap(),
            Progress::Resolved(Negotiated::Spdy(_))
        ));
        assert_eq!(negotiator.cache().get(&[1, 2, 3]), Some(Protocol::Spdy3));

        let mut resumed = Scripted::selecting(None);
        resumed.id = Some(vec![1, 2, 3]);
        resumed.reused = true;
        let clone = negotiator.clone();
        match clone.negotiate(resumed.clone()).unwrap() {
            Progress::Resolved(negotiated) => assert_eq!(negotiated.protocol(), Protocol::Spdy3),
            _ => panic!("cache should resolve a resumed session"),
        }
        assert_eq!(*resumed.reads.lock().unwrap(), 0);
    }

    #[test]
    fn test_cache_ignored_without_resumption() {
        let negotiator = server();
        negotiator.cache().insert(vec![9], Protocol::Spdy31);
        let mut fresh = Scripted::selecting(Some(Protocol::Http11));
        fresh.id = Some(vec![9]);
        match negotiator.negotiate(fresh).unwrap() {
            Progress::Resolved(negotiated) => assert_eq!(negotiated.protocol(), Protocol::Http11),
            _ => panic!("expected resolution"),
        }
        assert_eq!(negotiator.cache().get(&[9]), Some(Protocol::Http11));
    }

    #[test]
    fn test_require_spdy() {
        let negotiator = Negotiator::new(Role::Client, ConnectionConfig::default())
            .alpn_available(true)
            .require_spdy();
        let session = Scripted::selecting(Some(Protocol::Http11));
        assert!(matches!(negotiator.negotiate(session), Err(Error::SpdyRequired)));
    }

    #[test]
    fn test_client_without_alpn_falls_back_immediately() {
        let negotiator = Negotiator::new(Role::Client, ConnectionConfig::default()).alpn_available(true);
        let session = Scripted::selecting(None);
        match negotiator.negotiate(session.clone()).unwrap() {
            Progress::Resolved(Negotiated::Http11(transport)) => assert_eq!(transport.pending(), 0),
            _ => panic!("expected fallback"),
        }
        assert_eq!(*session.reads.lock().unwrap(), 0);
    }

    #[test]
    fn test_blocking_negotiation_times_out() {
        let session = Scripted::selecting(None);
        let result = server().negotiate_blocking(session, Duration::from_millis(10));
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn test_closed_transport_fails_negotiation() {
        struct Closed;

        impl SessionOps for Closed {
            fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> crate::http::Result<bool> {
                Ok(true)
            }
            fn read(&mut self, _buf: &mut [u8]) -> crate::http::Result<usize> {
                Ok(0)
            }
            fn write(&mut self, buf: &[u8]) -> crate::http::Result<usize> {
                Ok(buf.len())
            }
            fn close(&mut self) -> crate::http::Result<()> {
                Ok(())
            }
        }

        impl AlpnSession for Closed {
            fn selected_protocol(&self) -> Option<Protocol> {
                None
            }
            fn session_id(&self) -> Option<Vec<u8>> {
                None
            }
            fn session_reused(&self) -> bool {
                false
            }
        }

        assert!(matches!(server().negotiate(Closed), Err(Error::ConnectionClosed)));
    }
}
