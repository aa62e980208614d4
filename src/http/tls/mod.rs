//! TLS support for SPDY connections
//!
//! SPDY runs over TLS and picks its version through the application-layer
//! protocol negotiation (ALPN) extension. This module wraps OpenSSL for both
//! roles and exposes what the negotiator needs after the handshake.
//!
//! # Architecture
//!
//! 1. `TlsConfig` defines TLS settings (versions, certificates, protocols)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. Higher layers use the session transparently through `SessionOps`
//!
//! # Examples
//!
//! ```no_run
//! use spdylink::http::spdy::ProtocolSelector;
//! use spdylink::http::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpListener;
//!
//! let tls_config = TlsConfig::server()?
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)?
//!     .protocols(ProtocolSelector::default())?
//!     .build()?;
//!
//! let listener = TcpListener::bind("127.0.0.1:8443")?;
//! let (tcp_stream, _) = listener.accept()?;
//! let tls_session = tls_config.accept(tcp_stream)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cert;
pub mod config;
pub mod session;

pub use cert::CertInfo;
pub use config::{
    ClientConfigBuilder, ClientVerify, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion,
};
pub use session::TlsSessionOps;

use std::sync::OnceLock;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Whether the linked OpenSSL can negotiate ALPN (1.0.2 or newer)
///
/// Probed once per process.
pub fn alpn_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        let number = openssl::version::number();
        let supported = number >= 0x1000_2000;
        tracing::debug!(version = openssl::version::version(), supported, "ALPN capability probe");
        supported
    })
}
