//! Transport layer for spdylink
//!
//! This module provides the pieces shared by every protocol that runs on a
//! connection: the session operations abstraction, header collections and
//! the TLS layer. The SPDY engine itself lives in [`spdy`].
//!
//! # Architecture
//!
//! The transport uses a session operations abstraction pattern that allows
//! seamless switching between plain TCP, TLS and in-memory connections:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` adds timeouts on top of any `SessionOps`
//! - `PushbackSession` replays bytes that were read speculatively
//!
//! # Examples
//!
//! ```no_run
//! use spdylink::http::spdy::{ConnectionConfig, Protocol, SpdyClient};
//! use spdylink::http::{FdSessionOps, Headers};
//! use std::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:8443").unwrap();
//! let config = ConnectionConfig::default();
//! let mut client = SpdyClient::new(FdSessionOps::new(stream), Protocol::Spdy31, config).unwrap();
//!
//! let mut headers = Headers::new();
//! headers.insert(":method", "GET");
//! headers.insert(":path", "/");
//! client.request(headers, bytes::Bytes::new(), |result| {
//!     let exchange = result.unwrap();
//!     println!("status {:?}", exchange.status());
//! }).unwrap();
//! client.run_until_idle().unwrap();
//! ```

pub mod headers;
pub mod session;
pub mod spdy;
pub mod tls;

pub use headers::Headers;
pub use session::{FdSessionOps, HttpSession, PollEvents, PushbackSession, SessionOps};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether this error means "no data yet" rather than a failure
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}
