//! SPDY/3 and SPDY/3.1 protocol engine
//!
//! This module provides a multiplexed, flow-controlled SPDY connection on
//! top of any [`SessionOps`](crate::http::SessionOps) transport, plus the
//! negotiator that decides at connection-open time whether a TLS
//! connection speaks SPDY or falls back to HTTP/1.1.
//!
//! # Architecture
//!
//! - **Frames and codec**: SPDY/3 control and data frames
//!   ([`frames`], [`codec`])
//! - **Header compression**: connection-scoped zlib contexts primed with
//!   the SPDY/3 dictionary ([`compression`]), working in pooled buffers
//!   ([`pool`])
//! - **Flow control**: per-stream and per-connection send windows
//!   ([`flow_control`])
//! - **Streams and connection**: the stream state machine and the
//!   multiplexer that owns everything for one transport
//!   ([`stream`], [`connection`])
//! - **Negotiation**: ALPN outcome, session-resumption cache and the
//!   speculative read with exact pushback ([`negotiate`])
//! - **Adapters**: request/response surfaces for both roles
//!   ([`client`], [`server`])
//!
//! Each connection is driven by one caller at a time: every operation takes
//! `&mut self`, so frame decoding, header compression and window accounting
//! for one connection are never interleaved. Separate connections are fully
//! independent and may live on separate threads.
//!
//! # Examples
//!
//! ## Client over TLS
//!
//! ```no_run
//! use spdylink::http::spdy::{ConnectionConfig, Negotiated, Negotiator, ProtocolSelector, Role, SpdyClient};
//! use spdylink::http::tls::TlsConfig;
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = TlsConfig::client()?
//!     .servername("example.com")
//!     .protocols(ProtocolSelector::default())?
//!     .build()?;
//! let session = tls.connect(TcpStream::connect("example.com:443")?)?;
//!
//! let negotiator = Negotiator::new(Role::Client, ConnectionConfig::default());
//! match negotiator.negotiate_blocking(session, Duration::from_secs(5))? {
//!     Negotiated::Spdy(connection) => {
//!         let mut client = SpdyClient::from_connection(connection);
//!         client.get("/", "example.com", |result| match result {
//!             Ok(exchange) => println!("status {:?}", exchange.status()),
//!             Err(e) => eprintln!("request failed: {}", e),
//!         })?;
//!         client.run_until_idle()?;
//!     }
//!     Negotiated::Http11(_transport) => {
//!         // Hand the transport, pushed-back bytes included, to an HTTP/1.1 engine
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Server
//!
//! ```no_run
//! use spdylink::http::spdy::{ConnectionConfig, Protocol, SpdyResponse, SpdyServer};
//! use spdylink::http::FdSessionOps;
//! use std::net::TcpListener;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = TcpListener::bind("127.0.0.1:8443")?;
//! let (stream, _) = listener.accept()?;
//!
//! let mut server = SpdyServer::new(FdSessionOps::new(stream), Protocol::Spdy3, ConnectionConfig::default())?;
//! server.serve(|request| SpdyResponse::new(200).body("hello"))?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod compression;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod negotiate;
pub mod pool;
pub mod server;
pub mod settings;
pub mod stream;

pub use client::{Exchange, SpdyClient};
pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use connection::{Connection, Event, Role};
pub use error::{Error, GoawayStatus, Result, RstStatus};
pub use frames::{Frame, FrameType};
pub use negotiate::{AlpnSession, Negotiated, Negotiator, Progress, Protocol, ProtocolSelector};
pub use server::{SpdyRequest, SpdyResponse, SpdyServer};
pub use settings::{SettingId, Settings, SettingsBuilder};
pub use stream::{StreamId, StreamState};

/// Version carried in every control frame header
pub const SPDY_VERSION: u16 = 3;

/// Initial stream window and initial spdy/3.1 connection window
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65536;

/// Largest window size (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
