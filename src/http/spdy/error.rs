//! SPDY error types
//!
//! This module defines the engine's error type together with the status
//! codes carried by RST_STREAM and GOAWAY frames.

use super::stream::StreamId;
use std::fmt;

/// SPDY errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the transport layer
    #[error("Transport error: {0}")]
    Http(#[from] crate::http::Error),

    /// Protocol violation that compromises the connection
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Window accounting violated
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Shared compression context failed or desynchronized
    #[error("Compression error: {0}")]
    Compression(String),

    /// A single header entry does not fit a work buffer
    #[error("Header too large: {name} needs {size} bytes")]
    HeaderTooLarge { name: String, size: usize },

    /// Decompressed header block is malformed
    #[error("Invalid header block: {0}")]
    InvalidHeaderBlock(String),

    /// Stream was reset by either side
    #[error("Stream {stream_id} reset: {status}")]
    StreamReset { stream_id: StreamId, status: RstStatus },

    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    #[error("Stream closed: {0}")]
    StreamClosed(StreamId),

    #[error("Too many concurrent streams")]
    TooManyStreams,

    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    #[error("Connection closed")]
    ConnectionClosed,

    /// ALPN is not available in this environment
    #[error("Protocol negotiation unavailable")]
    NegotiationUnavailable,

    /// Negotiation settled on HTTP/1.1 where only SPDY is acceptable
    #[error("Peer does not speak SPDY")]
    SpdyRequired,

    /// New streams refused after GOAWAY
    #[error("Connection is going away")]
    GoingAway,

    #[error("Frame size error: {0}")]
    FrameSize(String),

    #[error("Unsupported SPDY version: {0}")]
    UnsupportedVersion(u16),

    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// Whether the error compromises the whole connection
    ///
    /// Stream-level errors reset one stream and leave the others running.
    pub fn is_connection_error(&self) -> bool {
        !matches!(
            self,
            Error::FlowControl(_)
                | Error::HeaderTooLarge { .. }
                | Error::InvalidHeaderBlock(_)
                | Error::StreamReset { .. }
                | Error::StreamNotFound(_)
                | Error::StreamClosed(_)
                | Error::TooManyStreams
                | Error::GoingAway
        )
    }

    /// Whether the transport simply had nothing to read yet
    pub fn is_would_block(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::WouldBlock,
            Error::Http(e) => e.is_would_block(),
            _ => false,
        }
    }

    /// Status to put on the wire when this error resets a stream
    pub fn rst_status(&self) -> RstStatus {
        match self {
            Error::FlowControl(_) => RstStatus::FlowControlError,
            Error::HeaderTooLarge { .. } => RstStatus::InternalError,
            Error::StreamReset { status, .. } => *status,
            Error::StreamNotFound(_) => RstStatus::InvalidStream,
            Error::StreamClosed(_) => RstStatus::StreamAlreadyClosed,
            Error::TooManyStreams | Error::GoingAway => RstStatus::RefusedStream,
            Error::FrameSize(_) => RstStatus::FrameTooLarge,
            Error::UnsupportedVersion(_) => RstStatus::UnsupportedVersion,
            _ => RstStatus::ProtocolError,
        }
    }
}

/// RST_STREAM status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RstStatus {
    /// Generic error for an unspecific protocol violation
    ProtocolError = 1,
    /// Frame received for a stream that is not active
    InvalidStream = 2,
    /// Stream refused before any processing
    RefusedStream = 3,
    UnsupportedVersion = 4,
    /// Stream no longer needed
    Cancel = 5,
    InternalError = 6,
    FlowControlError = 7,
    /// SYN_REPLY for an already open stream
    StreamInUse = 8,
    /// Data or SYN_REPLY after the peer half-closed
    StreamAlreadyClosed = 9,
    InvalidCredentials = 10,
    FrameTooLarge = 11,
}

impl RstStatus {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1 => Some(RstStatus::ProtocolError),
            2 => Some(RstStatus::InvalidStream),
            3 => Some(RstStatus::RefusedStream),
            4 => Some(RstStatus::UnsupportedVersion),
            5 => Some(RstStatus::Cancel),
            6 => Some(RstStatus::InternalError),
            7 => Some(RstStatus::FlowControlError),
            8 => Some(RstStatus::StreamInUse),
            9 => Some(RstStatus::StreamAlreadyClosed),
            10 => Some(RstStatus::InvalidCredentials),
            11 => Some(RstStatus::FrameTooLarge),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RstStatus::ProtocolError => "PROTOCOL_ERROR",
            RstStatus::InvalidStream => "INVALID_STREAM",
            RstStatus::RefusedStream => "REFUSED_STREAM",
            RstStatus::UnsupportedVersion => "UNSUPPORTED_VERSION",
            RstStatus::Cancel => "CANCEL",
            RstStatus::InternalError => "INTERNAL_ERROR",
            RstStatus::FlowControlError => "FLOW_CONTROL_ERROR",
            RstStatus::StreamInUse => "STREAM_IN_USE",
            RstStatus::StreamAlreadyClosed => "STREAM_ALREADY_CLOSED",
            RstStatus::InvalidCredentials => "INVALID_CREDENTIALS",
            RstStatus::FrameTooLarge => "FRAME_TOO_LARGE",
        }
    }
}

impl fmt::Display for RstStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// GOAWAY status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoawayStatus {
    Ok = 0,
    ProtocolError = 1,
    InternalError = 2,
}

impl GoawayStatus {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(GoawayStatus::Ok),
            1 => Some(GoawayStatus::ProtocolError),
            2 => Some(GoawayStatus::InternalError),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GoawayStatus::Ok => "OK",
            GoawayStatus::ProtocolError => "PROTOCOL_ERROR",
            GoawayStatus::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for GoawayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// Result type for SPDY operations
pub type Result<T> = std::result::Result<T, Error>;
