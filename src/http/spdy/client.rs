//! SPDY client adapter
//!
//! Turns a client-role [`Connection`] into a request/callback surface: each
//! request opens one stream and its callback fires exactly once, with the
//! response or with the error that ended the stream.

use super::config::ConnectionConfig;
use super::connection::{Connection, Event, Role};
use super::error::{Error, Result};
use super::negotiate::Protocol;
use super::stream::StreamId;
use crate::http::{Headers, SessionOps};
use bytes::Bytes;
use tracing::debug;

pub use super::stream::Exchange;

/// SPDY client
pub struct SpdyClient<S: SessionOps> {
    connection: Connection<S>,
}

impl<S: SessionOps> SpdyClient<S> {
    /// Start a client connection on a transport already known to speak SPDY
    pub fn new(session: S, protocol: Protocol, config: ConnectionConfig) -> Result<Self> {
        let connection = Connection::new(session, Role::Client, protocol, config)?;
        Ok(SpdyClient { connection })
    }

    /// Wrap a negotiated connection
    pub fn from_connection(connection: Connection<S>) -> Self {
        SpdyClient { connection }
    }

    /// Send a request
    ///
    /// The headers go out with FIN when `body` is empty; otherwise the body
    /// follows under flow control and carries the FIN. `callback` fires once
    /// the response is complete or the stream fails. If this returns an
    /// error, `callback` is never called.
    pub fn request<F>(&mut self, headers: Headers, body: Bytes, callback: F) -> Result<StreamId>
    where
        F: FnOnce(Result<Exchange>) + Send + 'static,
    {
        let fin = body.is_empty();
        let stream_id = self.connection.open_stream(headers, fin, Some(Box::new(callback)))?;
        if !fin {
            self.connection.send_data(stream_id, body, true)?;
        }
        self.connection.flush()?;
        Ok(stream_id)
    }

    /// Send a GET for `path` on `authority`
    pub fn get<F>(&mut self, path: &str, authority: &str, callback: F) -> Result<StreamId>
    where
        F: FnOnce(Result<Exchange>) + Send + 'static,
    {
        let mut headers = Headers::new();
        headers.insert(":method", "GET");
        headers.insert(":path", path);
        headers.insert(":version", "HTTP/1.1");
        headers.insert(":host", authority);
        headers.insert(":scheme", "https");
        self.request(headers, Bytes::new(), callback)
    }

    /// Drive the connection until every stream has finished
    ///
    /// Also returns when the connection ends; streams still open at that
    /// point have had their callbacks fail.
    pub fn run_until_idle(&mut self) -> Result<()> {
        while self.connection.active_streams() > 0 {
            if !self.connection.process()? {
                break;
            }
        }
        Ok(())
    }

    /// Send a PING; its echo surfaces through [`poll_event`](Self::poll_event)
    pub fn ping(&mut self) -> Result<u32> {
        let id = self.connection.ping()?;
        self.connection.flush()?;
        Ok(id)
    }

    /// Wait for the echo of a ping sent with [`ping`](Self::ping)
    pub fn wait_pong(&mut self, id: u32) -> Result<()> {
        loop {
            while let Some(event) = self.connection.poll_event() {
                match event {
                    Event::Pong { id: echoed } if echoed == id => return Ok(()),
                    other => debug!(event = ?other, "event while waiting for pong"),
                }
            }
            if !self.connection.process()? {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.connection.poll_event()
    }

    /// Send GOAWAY and close the transport
    pub fn close(&mut self) -> Result<()> {
        self.connection.close()
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<S> {
        &mut self.connection
    }

    pub fn into_connection(self) -> Connection<S> {
        self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::spdy::connection::tests::{MemorySession, Peer};
    use crate::http::spdy::frames::{DataFrame, Frame, PingFrame, SynReplyFrame};
    use std::sync::{Arc, Mutex};

    fn client() -> (SpdyClient<MemorySession>, Peer) {
        let transport = MemorySession::default();
        let peer = Peer::new(&transport);
        let client = SpdyClient::new(transport, Protocol::Spdy31, ConnectionConfig::default()).unwrap();
        (client, peer)
    }

    #[test]
    fn test_get_sets_request_headers() {
        let (mut client, mut peer) = client();
        client.get("/index.html", "example.com", |_| {}).unwrap();

        let syn = peer
            .received()
            .into_iter()
            .find_map(|f| match f {
                Frame::SynStream(s) => Some(s),
                _ => None,
            })
            .unwrap();
        assert!(syn.fin);
        let headers = peer.headers_of(&syn.header_block);
        assert_eq!(headers.get(":method"), Some("GET"));
        assert_eq!(headers.get(":path"), Some("/index.html"));
        assert_eq!(headers.get(":host"), Some("example.com"));
        assert_eq!(headers.get(":version"), Some("HTTP/1.1"));
        assert_eq!(headers.get(":scheme"), Some("https"));
    }

    #[test]
    fn test_request_body_carries_fin() {
        let (mut client, mut peer) = client();
        let mut headers = Headers::new();
        headers.insert(":method", "POST");
        let id = client
            .request(headers, Bytes::from_static(b"payload"), |_| {})
            .unwrap();

        let frames = peer.received();
        let syn_fin = frames.iter().find_map(|f| match f {
            Frame::SynStream(s) => Some(s.fin),
            _ => None,
        });
        assert_eq!(syn_fin, Some(false));
        assert!(frames.contains(&Frame::Data(DataFrame::new(id, Bytes::from_static(b"payload"), true))));
    }

    #[test]
    fn test_callback_fires_once_with_response() {
        let (mut client, mut peer) = client();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let id = client
            .get("/x", "localhost", move |result| {
                sink.lock().unwrap().push(result.map(|e| (e.status(), e.body)).map_err(|e| e.to_string()));
            })
            .unwrap();

        let block = peer.block(&[(":status", "200"), (":version", "HTTP/1.1")]);
        peer.send(Frame::SynReply(SynReplyFrame {
            stream_id: id,
            fin: false,
            header_block: block,
        }));
        peer.send(Frame::Data(DataFrame::new(id, Bytes::from_static(b"ok"), true)));
        client.run_until_idle().unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![Ok((Some(200), Bytes::from_static(b"ok")))]);
    }

    #[test]
    fn test_ping_round_trip() {
        let (mut client, mut peer) = client();
        let id = client.ping().unwrap();
        peer.received();
        peer.send(Frame::Ping(PingFrame { id }));
        client.wait_pong(id).unwrap();
    }

    #[test]
    fn test_close_sends_goaway() {
        let (mut client, mut peer) = client();
        client.close().unwrap();
        assert!(client.connection().is_closed());
        assert!(peer.received().iter().any(|f| matches!(f, Frame::Goaway(_))));
        assert!(matches!(client.get("/", "a", |_| {}), Err(Error::ConnectionClosed)));
    }
}
