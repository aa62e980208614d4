//! SPDY server adapter
//!
//! Drives a server-role [`Connection`] and hands each complete request to a
//! handler, writing the handler's response back on the same stream.

use super::config::ConnectionConfig;
use super::connection::{Connection, Event, Role};
use super::error::Result;
use super::negotiate::Protocol;
use super::stream::StreamId;
use crate::http::{Headers, SessionOps};
use bytes::Bytes;
use tracing::{debug, warn};

/// A request received on a peer-opened stream
#[derive(Debug, Clone)]
pub struct SpdyRequest {
    pub stream_id: StreamId,
    pub headers: Headers,
    pub body: Bytes,
}

impl SpdyRequest {
    pub fn method(&self) -> Option<&str> {
        self.headers.get(":method")
    }

    pub fn path(&self) -> Option<&str> {
        self.headers.get(":path")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Response built by a request handler
#[derive(Debug, Clone)]
pub struct SpdyResponse {
    status: u16,
    headers: Headers,
    body: Bytes,
}

impl SpdyResponse {
    pub fn new(status: u16) -> Self {
        SpdyResponse {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reply headers and body, with `:status` and `:version` filled in
    /// unless the handler set them
    pub fn into_parts(self) -> (Headers, Bytes) {
        let mut headers = self.headers;
        if !headers.contains(":status") {
            headers.insert(":status", self.status.to_string());
        }
        if !headers.contains(":version") {
            headers.insert(":version", "HTTP/1.1");
        }
        (headers, self.body)
    }
}

/// SPDY server for one connection
pub struct SpdyServer<S: SessionOps> {
    connection: Connection<S>,
}

impl<S: SessionOps> SpdyServer<S> {
    /// Start a server connection on a transport already known to speak SPDY
    pub fn new(session: S, protocol: Protocol, config: ConnectionConfig) -> Result<Self> {
        let connection = Connection::new(session, Role::Server, protocol, config)?;
        Ok(SpdyServer { connection })
    }

    /// Wrap a negotiated connection
    pub fn from_connection(connection: Connection<S>) -> Self {
        SpdyServer { connection }
    }

    /// Serve requests until the peer goes away or closes the transport
    ///
    /// A response that cannot be sent only resets its own stream.
    pub fn serve<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(SpdyRequest) -> SpdyResponse,
    {
        while self.connection.process()? {
            while let Some(event) = self.connection.poll_event() {
                match event {
                    Event::IncomingRequest {
                        stream_id,
                        headers,
                        body,
                    } => {
                        let response = handler(SpdyRequest {
                            stream_id,
                            headers,
                            body,
                        });
                        self.respond(stream_id, response)?;
                    }
                    other => debug!(event = ?other, "connection event"),
                }
            }
        }
        debug!("connection finished");
        Ok(())
    }

    /// Send a response on a peer-opened stream
    pub fn respond(&mut self, stream_id: StreamId, response: SpdyResponse) -> Result<()> {
        let (headers, body) = response.into_parts();
        let fin = body.is_empty();

        let sent = self
            .connection
            .reply(stream_id, headers, fin)
            .and_then(|()| {
                if fin {
                    Ok(())
                } else {
                    self.connection.send_data(stream_id, body, true)
                }
            });

        match sent {
            Ok(()) => self.connection.flush(),
            Err(e) if !e.is_connection_error() => {
                warn!(stream_id, error = %e, "response dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
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
}
