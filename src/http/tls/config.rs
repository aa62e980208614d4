//! TLS configuration
//!
//! This module provides TLS configuration builders for both client and server.
//! Both sides can carry an application-protocol preference list; on the server
//! the ALPN selection callback records what it decided on the connection so the
//! negotiator can tell "peer declined" apart from "peer never asked".

use crate::http::spdy::negotiate::{decode_alpn_list, Protocol, ProtocolSelector};
use openssl::ex_data::Index;
use openssl::pkey::PKey;
use openssl::ssl::{
    AlpnError, Ssl, SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion,
};
use openssl::x509::X509;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// Client certificate verification mode (server-side)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVerify {
    /// Don't request client certificates
    None,
    /// Request client certificate but don't require it
    Optional,
    /// Require client certificate
    Required,
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

static SELECTED_PROTOCOL: OnceLock<Index<Ssl, Protocol>> = OnceLock::new();

/// Ex-data slot holding the server callback's decision for a connection
pub(crate) fn selected_protocol_index() -> Result<Index<Ssl, Protocol>, TlsError> {
    if let Some(index) = SELECTED_PROTOCOL.get() {
        return Ok(*index);
    }
    let index = Ssl::new_ex_index::<Protocol>()?;
    // A racing initializer may have won; either index is usable but only one is kept.
    Ok(*SELECTED_PROTOCOL.get_or_init(|| index))
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
    pub(crate) protocols: Option<ProtocolSelector>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> Result<ClientConfigBuilder, TlsError> {
        ClientConfigBuilder::new()
    }

    /// Create a new server configuration builder
    pub fn server() -> Result<ServerConfigBuilder, TlsError> {
        ServerConfigBuilder::new()
    }

    /// Application protocols offered or accepted, if configured
    pub fn protocols(&self) -> Option<&ProtocolSelector> {
        self.protocols.as_ref()
    }

    /// Connect to a server with TLS (client-side)
    pub fn connect(&self, stream: std::net::TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        super::session::TlsSessionOps::connect(stream, self.clone())
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept(&self, stream: std::net::TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        super::session::TlsSessionOps::accept(stream, self.clone())
    }
}

fn load_pem_bundle(ctx_builder: &mut SslContextBuilder, path: &Path) -> Result<(), TlsError> {
    let mut pem = Vec::new();
    File::open(path)?.read_to_end(&mut pem)?;

    let cert = X509::from_pem(&pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
    ctx_builder.set_certificate(&cert)?;

    let key = PKey::private_key_from_pem(&pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
    ctx_builder.set_private_key(&key)?;
    Ok(())
}

fn set_versions(
    ctx_builder: &mut SslContextBuilder,
    min: TlsVersion,
    max: TlsVersion,
) -> Result<(), TlsError> {
    if min > max {
        return Err(TlsError::InvalidConfig(format!(
            "minimum version {:?} above maximum {:?}",
            min, max
        )));
    }
    ctx_builder.set_min_proto_version(Some(min.to_openssl_version()))?;
    ctx_builder.set_max_proto_version(Some(max.to_openssl_version()))?;
    Ok(())
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    ctx_builder: SslContextBuilder,
    servername: Option<String>,
    protocols: Option<ProtocolSelector>,
}

impl ClientConfigBuilder {
    fn new() -> Result<Self, TlsError> {
        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())?;

        // Default: don't verify peer
        ctx_builder.set_verify(SslVerifyMode::NONE);

        Ok(ClientConfigBuilder {
            ctx_builder,
            servername: None,
            protocols: None,
        })
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Result<Self, TlsError> {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        set_versions(&mut self.ctx_builder, min, max)?;
        Ok(self)
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Result<Self, TlsError> {
        self.ctx_builder.set_cipher_list(ciphers)?;
        Ok(self)
    }

    /// Offer these application protocols, most preferred first
    pub fn protocols(mut self, selector: ProtocolSelector) -> Result<Self, TlsError> {
        self.ctx_builder.set_alpn_protos(&selector.alpn_wire())?;
        self.protocols = Some(selector);
        Ok(self)
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        let mode = if verify {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        };
        self.ctx_builder.set_verify(mode);
        self
    }

    /// Load client certificate and key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        load_pem_bundle(&mut self.ctx_builder, path.as_ref())?;
        Ok(self)
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: false,
            servername: self.servername,
            protocols: self.protocols,
        })
    }
}

/// Server configuration builder
pub struct ServerConfigBuilder {
    ctx_builder: SslContextBuilder,
    has_cert: bool,
    protocols: Option<ProtocolSelector>,
}

impl ServerConfigBuilder {
    fn new() -> Result<Self, TlsError> {
        Ok(ServerConfigBuilder {
            ctx_builder: SslContextBuilder::new(SslMethod::tls_server())?,
            has_cert: false,
            protocols: None,
        })
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Result<Self, TlsError> {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        set_versions(&mut self.ctx_builder, min, max)?;
        Ok(self)
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Result<Self, TlsError> {
        self.ctx_builder.set_cipher_list(ciphers)?;
        Ok(self)
    }

    /// Accept these application protocols, most preferred first
    ///
    /// The selection callback picks the first local protocol the client also
    /// offered. When nothing matches it records HTTP/1.1 on the connection and
    /// lets the handshake continue without an ALPN extension.
    pub fn protocols(mut self, selector: ProtocolSelector) -> Result<Self, TlsError> {
        let index = selected_protocol_index()?;
        let callback_selector = selector.clone();

        self.ctx_builder.set_alpn_select_callback(move |ssl, client_protos| {
            trace!(offered = ?decode_alpn_list(client_protos), "ALPN select");
            let (protocol, token) = callback_selector.select_wire(client_protos);
            ssl.set_ex_data(index, protocol);
            match token {
                Some(token) => {
                    debug!(protocol = %protocol, "ALPN selected");
                    Ok(token)
                }
                None => {
                    debug!("ALPN found no common protocol, recording http/1.1");
                    Err(AlpnError::NOACK)
                }
            }
        });

        self.protocols = Some(selector);
        Ok(self)
    }

    /// Load server certificate and key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        load_pem_bundle(&mut self.ctx_builder, path.as_ref())?;
        self.has_cert = true;
        Ok(self)
    }

    /// Set client certificate verification mode
    pub fn client_verify(mut self, mode: ClientVerify) -> Self {
        let verify_mode = match mode {
            ClientVerify::None => SslVerifyMode::NONE,
            ClientVerify::Optional => SslVerifyMode::PEER,
            ClientVerify::Required => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        };

        self.ctx_builder.set_verify(verify_mode);
        self
    }

    /// Set CA file for client certificate verification
    pub fn client_verify_ca<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        self.ctx_builder.set_ca_file(path.as_ref())?;
        Ok(self)
    }

    /// Build the TLS configuration
    ///
    /// Without a configured certificate a fresh self-signed one is generated.
    pub fn build(mut self) -> Result<TlsConfig, TlsError> {
        if !self.has_cert {
            let (cert, key) = super::cert::self_signed("localhost")?;
            self.ctx_builder.set_certificate(&cert)?;
            self.ctx_builder.set_private_key(&key)?;
            self.has_cert = true;
        }

        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: true,
            servername: None,
            protocols: self.protocols,
        })
    }
}
