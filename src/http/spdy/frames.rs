//! SPDY/3 frame types
//!
//! Control frames carry a version and a 16-bit type; data frames carry a
//! stream id directly in their header. Header blocks inside SYN_STREAM,
//! SYN_REPLY and HEADERS stay compressed here; they are inflated by the
//! connection's shared decoder in receipt order.

use super::error::{GoawayStatus, RstStatus};
use super::settings::SettingsEntry;
use super::stream::StreamId;
use bytes::Bytes;
use std::fmt;

/// Control frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameType {
    SynStream = 1,
    SynReply = 2,
    RstStream = 3,
    Settings = 4,
    Ping = 6,
    Goaway = 7,
    Headers = 8,
    WindowUpdate = 9,
}

impl FrameType {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FrameType::SynStream),
            2 => Some(FrameType::SynReply),
            3 => Some(FrameType::RstStream),
            4 => Some(FrameType::Settings),
            6 => Some(FrameType::Ping),
            7 => Some(FrameType::Goaway),
            8 => Some(FrameType::Headers),
            9 => Some(FrameType::WindowUpdate),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameType::SynStream => "SYN_STREAM",
            FrameType::SynReply => "SYN_REPLY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::Headers => "HEADERS",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
        }
    }

    /// Flag bits this frame type may carry
    pub fn allowed_flags(&self) -> u8 {
        match self {
            FrameType::SynStream => Flags::FIN | Flags::UNIDIRECTIONAL,
            FrameType::SynReply | FrameType::Headers => Flags::FIN,
            FrameType::Settings => Flags::CLEAR_SETTINGS,
            _ => 0,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

/// Frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    /// Last frame from this sender on the stream
    pub const FIN: u8 = 0x01;
    /// SYN_STREAM opens a stream the recipient may not answer on
    pub const UNIDIRECTIONAL: u8 = 0x02;
    /// SETTINGS: drop previously persisted values
    pub const CLEAR_SETTINGS: u8 = 0x01;

    pub fn empty() -> Self {
        Flags(0)
    }

    pub fn from_u8(flags: u8) -> Self {
        Flags(flags)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub(crate) fn fin(fin: bool) -> Self {
        if fin {
            Flags(Self::FIN)
        } else {
            Flags(0)
        }
    }
}

/// DATA frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub data: Bytes,
    pub fin: bool,
}

impl DataFrame {
    pub fn new(stream_id: StreamId, data: Bytes, fin: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            fin,
        }
    }
}

/// SYN_STREAM frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynStreamFrame {
    pub stream_id: StreamId,
    pub associated_stream_id: StreamId,
    /// 0 is highest, 7 lowest
    pub priority: u8,
    pub slot: u8,
    pub fin: bool,
    pub unidirectional: bool,
    pub header_block: Bytes,
}

/// SYN_REPLY frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynReplyFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub header_block: Bytes,
}

/// HEADERS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub header_block: Bytes,
}

/// RST_STREAM frame
///
/// The raw status is kept so unknown codes can still be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub status_code: u32,
}

impl RstStreamFrame {
    pub fn new(stream_id: StreamId, status: RstStatus) -> Self {
        RstStreamFrame {
            stream_id,
            status_code: status.as_u32(),
        }
    }

    pub fn status(&self) -> Option<RstStatus> {
        RstStatus::from_u32(self.status_code)
    }
}

/// SETTINGS frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsFrame {
    pub clear: bool,
    pub entries: Vec<SettingsEntry>,
}

/// PING frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    pub id: u32,
}

/// GOAWAY frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoawayFrame {
    pub last_good_stream_id: StreamId,
    pub status_code: u32,
}

impl GoawayFrame {
    pub fn new(last_good_stream_id: StreamId, status: GoawayStatus) -> Self {
        GoawayFrame {
            last_good_stream_id,
            status_code: status.as_u32(),
        }
    }

    pub fn status(&self) -> Option<GoawayStatus> {
        GoawayStatus::from_u32(self.status_code)
    }
}

/// WINDOW_UPDATE frame; stream 0 addresses the connection window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub delta: u32,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    SynStream(SynStreamFrame),
    SynReply(SynReplyFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    Ping(PingFrame),
    Goaway(GoawayFrame),
    Headers(HeadersFrame),
    WindowUpdate(WindowUpdateFrame),
    /// Control frame of a type this engine does not know; skipped
    Unknown { frame_type: u16, flags: u8, length: usize },
}

impl Frame {
    /// Stream the frame addresses; 0 for connection-scoped frames
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::SynStream(f) => f.stream_id,
            Frame::SynReply(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Settings(_) | Frame::Ping(_) | Frame::Goaway(_) | Frame::Unknown { .. } => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data(_) => "DATA",
            Frame::SynStream(_) => FrameType::SynStream.name(),
            Frame::SynReply(_) => FrameType::SynReply.name(),
            Frame::RstStream(_) => FrameType::RstStream.name(),
            Frame::Settings(_) => FrameType::Settings.name(),
            Frame::Ping(_) => FrameType::Ping.name(),
            Frame::Goaway(_) => FrameType::Goaway.name(),
            Frame::Headers(_) => FrameType::Headers.name(),
            Frame::WindowUpdate(_) => FrameType::WindowUpdate.name(),
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }
}
