//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O. It also
//! exposes the handshake facts protocol negotiation relies on: the selected
//! application protocol, the session id and whether the session was resumed.

use super::cert::CertInfo;
use super::config::{selected_protocol_index, TlsConfig, TlsError};
use crate::http::session::{poll_timeout_ms, PollEvents, SessionOps};
use crate::http::spdy::negotiate::{AlpnSession, Protocol};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{Ssl, SslStream};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::debug;

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    is_server: bool,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS connection (perform handshake)
    pub fn connect(tcp_stream: TcpStream, config: TlsConfig) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername)?;
        }

        // Blocking handshake; the socket stays blocking afterwards
        let stream = ssl
            .connect(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Connection failed: {}", e)))?;

        debug!(
            version = stream.ssl().version_str(),
            alpn = ?stream.ssl().selected_alpn_protocol(),
            "TLS client handshake complete"
        );

        Ok(TlsSessionOps {
            stream,
            is_server: false,
            failed: false,
        })
    }

    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(tcp_stream: TcpStream, config: TlsConfig) -> Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        let stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;

        debug!(
            version = stream.ssl().version_str(),
            alpn = ?stream.ssl().selected_alpn_protocol(),
            "TLS server handshake complete"
        );

        Ok(TlsSessionOps {
            stream,
            is_server: true,
            failed: false,
        })
    }

    /// Negotiated TLS version, e.g. "TLSv1.3"
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Raw ALPN token agreed in the handshake, if any
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.stream.ssl().selected_alpn_protocol()
    }

    /// Subject and issuer of the peer certificate
    pub fn peer_certificate(&self) -> Option<CertInfo> {
        self.stream
            .ssl()
            .peer_certificate()
            .map(|cert| CertInfo::from_x509(&cert))
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

impl AlpnSession for TlsSessionOps {
    fn selected_protocol(&self) -> Option<Protocol> {
        let ssl = self.stream.ssl();
        if self.is_server {
            // Set by the selection callback, including its http/1.1 fallback
            if let Ok(index) = selected_protocol_index() {
                if let Some(protocol) = ssl.ex_data(index) {
                    return Some(*protocol);
                }
            }
        }
        ssl.selected_alpn_protocol().and_then(Protocol::from_token)
    }

    fn session_id(&self) -> Option<Vec<u8>> {
        self.stream
            .ssl()
            .session()
            .map(|session| session.id().to_vec())
            .filter(|id| !id.is_empty())
    }

    fn session_reused(&self) -> bool {
        self.stream.ssl().session_reused()
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        // Decrypted bytes already buffered inside OpenSSL
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        let mut pfd = pollfd {
            fd: self.stream.get_ref().as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
                PollEvents::Both => POLLIN | POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = poll_timeout_ms(timeout);

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        Ok(result > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        self.stream.read(buf).map_err(|e| {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                self.failed = true;
            }
            Error::Io(e)
        })
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        use std::net::Shutdown;
        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Error::from),
        }
    }
}
