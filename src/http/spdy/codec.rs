//! SPDY/3 frame encoding and decoding
//!
//! Encoding is a set of stateless functions writing into a `BytesMut`.
//! Decoding is incremental: bytes are fed as they arrive from the
//! transport and complete frames are pulled out one at a time, so a frame
//! split across reads is reassembled before it is handed on.

use super::error::{Error, Result};
use super::frames::*;
use super::settings::SettingsEntry;
use super::stream::StreamId;
use super::SPDY_VERSION;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Frame header size, control and data alike
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest length the 24-bit length field can carry
pub const MAX_FRAME_LENGTH: usize = 0x00FF_FFFF;

const CONTROL_BIT: u8 = 0x80;
const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// Frame encoder
pub struct FrameCodec;

impl FrameCodec {
    /// Write a control frame header
    pub fn encode_control_header(buf: &mut BytesMut, frame_type: FrameType, flags: Flags, length: usize) {
        buf.put_u16(0x8000 | SPDY_VERSION);
        buf.put_u16(frame_type.as_u16());
        buf.put_u8(flags.as_u8());
        put_u24(buf, length);
    }

    /// Write a data frame header
    pub fn encode_data_header(buf: &mut BytesMut, stream_id: StreamId, flags: Flags, length: usize) {
        buf.put_u32(stream_id & STREAM_ID_MASK);
        buf.put_u8(flags.as_u8());
        put_u24(buf, length);
    }

    pub fn encode_data(buf: &mut BytesMut, stream_id: StreamId, data: &[u8], fin: bool) {
        Self::encode_data_header(buf, stream_id, Flags::fin(fin), data.len());
        buf.put_slice(data);
    }

    pub fn encode_syn_stream(buf: &mut BytesMut, frame: &SynStreamFrame) {
        let mut flags = Flags::fin(frame.fin);
        if frame.unidirectional {
            flags.set(Flags::UNIDIRECTIONAL);
        }
        Self::encode_control_header(buf, FrameType::SynStream, flags, 10 + frame.header_block.len());
        buf.put_u32(frame.stream_id & STREAM_ID_MASK);
        buf.put_u32(frame.associated_stream_id & STREAM_ID_MASK);
        buf.put_u8((frame.priority & 0x07) << 5);
        buf.put_u8(frame.slot);
        buf.put_slice(&frame.header_block);
    }

    pub fn encode_syn_reply(buf: &mut BytesMut, frame: &SynReplyFrame) {
        Self::encode_control_header(buf, FrameType::SynReply, Flags::fin(frame.fin), 4 + frame.header_block.len());
        buf.put_u32(frame.stream_id & STREAM_ID_MASK);
        buf.put_slice(&frame.header_block);
    }

    pub fn encode_headers(buf: &mut BytesMut, frame: &HeadersFrame) {
        Self::encode_control_header(buf, FrameType::Headers, Flags::fin(frame.fin), 4 + frame.header_block.len());
        buf.put_u32(frame.stream_id & STREAM_ID_MASK);
        buf.put_slice(&frame.header_block);
    }

    pub fn encode_rst_stream(buf: &mut BytesMut, frame: &RstStreamFrame) {
        Self::encode_control_header(buf, FrameType::RstStream, Flags::empty(), 8);
        buf.put_u32(frame.stream_id & STREAM_ID_MASK);
        buf.put_u32(frame.status_code);
    }

    pub fn encode_settings(buf: &mut BytesMut, frame: &SettingsFrame) {
        let mut flags = Flags::empty();
        if frame.clear {
            flags.set(Flags::CLEAR_SETTINGS);
        }
        Self::encode_control_header(buf, FrameType::Settings, flags, 4 + 8 * frame.entries.len());
        buf.put_u32(frame.entries.len() as u32);
        for entry in &frame.entries {
            buf.put_u8(entry.flags);
            put_u24(buf, entry.id as usize);
            buf.put_u32(entry.value);
        }
    }

    pub fn encode_ping(buf: &mut BytesMut, frame: &PingFrame) {
        Self::encode_control_header(buf, FrameType::Ping, Flags::empty(), 4);
        buf.put_u32(frame.id);
    }

    pub fn encode_goaway(buf: &mut BytesMut, frame: &GoawayFrame) {
        Self::encode_control_header(buf, FrameType::Goaway, Flags::empty(), 8);
        buf.put_u32(frame.last_good_stream_id & STREAM_ID_MASK);
        buf.put_u32(frame.status_code);
    }

    pub fn encode_window_update(buf: &mut BytesMut, frame: &WindowUpdateFrame) {
        Self::encode_control_header(buf, FrameType::WindowUpdate, Flags::empty(), 8);
        buf.put_u32(frame.stream_id & STREAM_ID_MASK);
        buf.put_u32(frame.delta & STREAM_ID_MASK);
    }

    /// Append any frame to `buf`
    ///
    /// Unknown frames have no payload to reproduce and are skipped.
    pub fn encode_into(buf: &mut BytesMut, frame: &Frame) {
        match frame {
            Frame::Data(f) => Self::encode_data(buf, f.stream_id, &f.data, f.fin),
            Frame::SynStream(f) => Self::encode_syn_stream(buf, f),
            Frame::SynReply(f) => Self::encode_syn_reply(buf, f),
            Frame::RstStream(f) => Self::encode_rst_stream(buf, f),
            Frame::Settings(f) => Self::encode_settings(buf, f),
            Frame::Ping(f) => Self::encode_ping(buf, f),
            Frame::Goaway(f) => Self::encode_goaway(buf, f),
            Frame::Headers(f) => Self::encode_headers(buf, f),
            Frame::WindowUpdate(f) => Self::encode_window_update(buf, f),
            Frame::Unknown { .. } => {}
        }
    }

    /// Encode one frame into a fresh buffer
    pub fn encode(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, frame);
        buf.freeze()
    }
}

fn put_u24(buf: &mut BytesMut, value: usize) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

fn read_u24(bytes: &[u8]) -> usize {
    ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize)
}

/// Incremental frame decoder
///
/// Holds bytes read from the transport until they form whole frames.
/// Frames whose declared length exceeds `max_frame_length` are refused
/// before any room is reserved for their payload.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_length: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(4096),
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }

    /// Limit the payload length accepted from the peer
    pub fn set_max_frame_length(&mut self, max: usize) {
        self.max_frame_length = max.min(MAX_FRAME_LENGTH);
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Decoder whose input starts with bytes already read elsewhere
    pub fn with_preread(preread: &[u8]) -> Self {
        let mut decoder = Self::new();
        decoder.feed(preread);
        decoder
    }

    /// Append bytes read from the transport
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes held that do not yet form a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next complete frame, if one is buffered
    ///
    /// Header errors are reported as soon as the 8 header bytes are
    /// available, without waiting for the payload.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[..FRAME_HEADER_SIZE];
        let is_control = header[0] & CONTROL_BIT != 0;
        let flags = header[4];
        let length = read_u24(&header[5..8]);

        if is_control {
            let version = u16::from_be_bytes([header[0] & 0x7F, header[1]]);
            if version != SPDY_VERSION {
                return Err(Error::UnsupportedVersion(version));
            }
        }

        if length > self.max_frame_length {
            return Err(Error::FrameSize(format!(
                "frame length {} exceeds limit {}",
                length, self.max_frame_length
            )));
        }

        if self.buffer.len() < FRAME_HEADER_SIZE + length {
            self.buffer.reserve(FRAME_HEADER_SIZE + length - self.buffer.len());
            return Ok(None);
        }

        let header = self.buffer.split_to(FRAME_HEADER_SIZE);
        let payload = self.buffer.split_to(length).freeze();

        let frame = if is_control {
            let raw_type = u16::from_be_bytes([header[2], header[3]]);
            decode_control(raw_type, flags, payload)?
        } else {
            let stream_id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) & STREAM_ID_MASK;
            if flags & !Flags::FIN != 0 {
                return Err(Error::Protocol(format!(
                    "invalid DATA flags 0x{:02x} on stream {}",
                    flags, stream_id
                )));
            }
            Frame::Data(DataFrame::new(stream_id, payload, flags & Flags::FIN != 0))
        };

        if is_stream_scoped(&frame) && frame.stream_id() == 0 {
            return Err(Error::Protocol(format!("{} on stream 0", frame.name())));
        }

        trace!(frame = frame.name(), stream_id = frame.stream_id(), len = length, "decoded frame");
        Ok(Some(frame))
    }
}

/// Frames that must name a stream; stream 0 is the connection itself
fn is_stream_scoped(frame: &Frame) -> bool {
    matches!(
        frame,
        Frame::Data(_) | Frame::SynStream(_) | Frame::SynReply(_) | Frame::Headers(_) | Frame::RstStream(_)
    )
}

fn expect_length(frame_type: FrameType, payload: &Bytes, exact: Option<usize>, min: usize) -> Result<()> {
    let len = payload.len();
    let ok = match exact {
        Some(n) => len == n,
        None => len >= min,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::FrameSize(format!("{} with invalid length {}", frame_type.name(), len)))
    }
}

fn decode_control(raw_type: u16, flags: u8, mut payload: Bytes) -> Result<Frame> {
    let frame_type = match FrameType::from_u16(raw_type) {
        Some(t) => t,
        None => {
            return Ok(Frame::Unknown {
                frame_type: raw_type,
                flags,
                length: payload.len(),
            })
        }
    };

    if flags & !frame_type.allowed_flags() != 0 {
        return Err(Error::Protocol(format!(
            "invalid flags 0x{:02x} on {}",
            flags,
            frame_type.name()
        )));
    }
    let fin = flags & Flags::FIN != 0;

    let frame = match frame_type {
        FrameType::SynStream => {
            expect_length(frame_type, &payload, None, 10)?;
            let stream_id = payload.get_u32() & STREAM_ID_MASK;
            let associated_stream_id = payload.get_u32() & STREAM_ID_MASK;
            let priority = payload.get_u8() >> 5;
            let slot = payload.get_u8();
            Frame::SynStream(SynStreamFrame {
                stream_id,
                associated_stream_id,
                priority,
                slot,
                fin,
                unidirectional: flags & Flags::UNIDIRECTIONAL != 0,
                header_block: payload,
            })
        }
        FrameType::SynReply => {
            expect_length(frame_type, &payload, None, 4)?;
            let stream_id = payload.get_u32() & STREAM_ID_MASK;
            Frame::SynReply(SynReplyFrame {
                stream_id,
                fin,
                header_block: payload,
            })
        }
        FrameType::Headers => {
            expect_length(frame_type, &payload, None, 4)?;
            let stream_id = payload.get_u32() & STREAM_ID_MASK;
            Frame::Headers(HeadersFrame {
                stream_id,
                fin,
                header_block: payload,
            })
        }
        FrameType::RstStream => {
            expect_length(frame_type, &payload, Some(8), 8)?;
            Frame::RstStream(RstStreamFrame {
                stream_id: payload.get_u32() & STREAM_ID_MASK,
                status_code: payload.get_u32(),
            })
        }
        FrameType::Settings => {
            expect_length(frame_type, &payload, None, 4)?;
            let count = payload.get_u32() as usize;
            if payload.len() != count.saturating_mul(8) {
                return Err(Error::FrameSize(format!(
                    "SETTINGS declares {} entries in {} bytes",
                    count,
                    payload.len()
                )));
            }
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let flags = payload.get_u8();
                let id = read_u24(&payload[..3]) as u32;
                payload.advance(3);
                let value = payload.get_u32();
                entries.push(SettingsEntry { flags, id, value });
            }
            Frame::Settings(SettingsFrame {
                clear: flags & Flags::CLEAR_SETTINGS != 0,
                entries,
            })
        }
        FrameType::Ping => {
            expect_length(frame_type, &payload, Some(4), 4)?;
            Frame::Ping(PingFrame {
                id: payload.get_u32(),
            })
        }
        FrameType::Goaway => {
            expect_length(frame_type, &payload, Some(8), 8)?;
            Frame::Goaway(GoawayFrame {
                last_good_stream_id: payload.get_u32() & STREAM_ID_MASK,
                status_code: payload.get_u32(),
            })
        }
        FrameType::WindowUpdate => {
            expect_length(frame_type, &payload, Some(8), 8)?;
            Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: payload.get_u32() & STREAM_ID_MASK,
                delta: payload.get_u32() & STREAM_ID_MASK,
            })
        }
    };
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::spdy::error::{GoawayStatus, RstStatus};
    use crate::http::spdy::settings::SettingId;

    fn decode_one(bytes: &[u8]) -> Frame {
        let mut decoder = FrameDecoder::with_preread(bytes);
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(decoder.buffered(), 0);
        frame
    }

    #[test]
    fn test_control_header_layout() {
        let mut buf = BytesMut::new();
        FrameCodec::encode_ping(&mut buf, &PingFrame { id: 7 });

        assert_eq!(&buf[..], &[0x80, 0x03, 0x00, 0x06, 0x00, 0x00, 0x00, 0x04, 0, 0, 0, 7]);
    }

    #[test]
    fn test_data_header_layout() {
        let mut buf = BytesMut::new();
        FrameCodec::encode_data(&mut buf, 0x0102_0304, b"ok", true);

        assert_eq!(&buf[..8], &[0x01, 0x02, 0x03, 0x04, 0x01, 0x00, 0x00, 0x02]);
        assert_eq!(&buf[8..], b"ok");
    }

    #[test]
    fn test_syn_stream_fields() {
        let frame = Frame::SynStream(SynStreamFrame {
            stream_id: 3,
            associated_stream_id: 0,
            priority: 5,
            slot: 0,
            fin: true,
            unidirectional: false,
            header_block: Bytes::from_static(b"block"),
        });
        let encoded = FrameCodec::encode(&frame);
        assert_eq!(encoded[4], Flags::FIN);
        assert_eq!(encoded[16], 5 << 5);
        assert_eq!(decode_one(&encoded), frame);
    }

    #[test]
    fn test_settings_entries() {
        let frame = Frame::Settings(SettingsFrame {
            clear: false,
            entries: vec![
                SettingsEntry::new(SettingId::MaxConcurrentStreams, 100),
                SettingsEntry::new(SettingId::InitialWindowSize, 65536),
            ],
        });
        let encoded = FrameCodec::encode(&frame);
        assert_eq!(read_u24(&encoded[5..8]), 4 + 16);
        assert_eq!(decode_one(&encoded), frame);
    }

    #[test]
    fn test_fixed_size_frames() {
        for frame in [
            Frame::RstStream(RstStreamFrame::new(9, RstStatus::Cancel)),
            Frame::Goaway(GoawayFrame::new(11, GoawayStatus::Ok)),
            Frame::WindowUpdate(WindowUpdateFrame { stream_id: 0, delta: 1024 }),
        ] {
            assert_eq!(decode_one(&FrameCodec::encode(&frame)), frame);
        }
    }

    #[test]
    fn test_partial_frames_wait_for_more() {
        let encoded = FrameCodec::encode(&Frame::Data(DataFrame::new(1, Bytes::from_static(b"hello"), false)));
        let mut decoder = FrameDecoder::new();

        decoder.feed(&encoded[..5]);
        assert!(decoder.decode().unwrap().is_none());
        decoder.feed(&encoded[5..10]);
        assert!(decoder.decode().unwrap().is_none());
        decoder.feed(&encoded[10..]);

        match decoder.decode().unwrap() {
            Some(Frame::Data(data)) => assert_eq!(&data.data[..], b"hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_version() {
        let mut decoder = FrameDecoder::with_preread(&[0x80, 0x02, 0x00, 0x06, 0, 0, 0, 4]);
        assert!(matches!(decoder.decode(), Err(Error::UnsupportedVersion(2))));
    }

    #[test]
    fn test_invalid_control_flags() {
        let mut decoder = FrameDecoder::with_preread(&[0x80, 0x03, 0x00, 0x06, 0x01, 0, 0, 4, 0, 0, 0, 1]);
        assert!(matches!(decoder.decode(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bad_fixed_length() {
        let mut decoder = FrameDecoder::with_preread(&[0x80, 0x03, 0x00, 0x03, 0x00, 0, 0, 4, 0, 0, 0, 1]);
        assert!(matches!(decoder.decode(), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_unknown_control_type_skipped() {
        let mut decoder = FrameDecoder::with_preread(&[0x80, 0x03, 0x00, 0x0A, 0x00, 0, 0, 2, 0xAA, 0xBB]);
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Frame::Unknown {
                frame_type: 10,
                flags: 0,
                length: 2
            })
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_stream_zero_rejected() {
        let block = Bytes::from_static(b"block");
        for frame in [
            Frame::Data(DataFrame::new(0, Bytes::from_static(b"x"), false)),
            Frame::SynStream(SynStreamFrame {
                stream_id: 0,
                associated_stream_id: 0,
                priority: 0,
                slot: 0,
                fin: false,
                unidirectional: false,
                header_block: block.clone(),
            }),
            Frame::SynReply(SynReplyFrame {
                stream_id: 0,
                fin: false,
                header_block: block.clone(),
            }),
            Frame::Headers(HeadersFrame {
                stream_id: 0,
                fin: false,
                header_block: block.clone(),
            }),
            Frame::RstStream(RstStreamFrame::new(0, RstStatus::Cancel)),
        ] {
            let mut decoder = FrameDecoder::with_preread(&FrameCodec::encode(&frame));
            assert!(matches!(decoder.decode(), Err(Error::Protocol(_))), "{}", frame.name());
        }

        // Connection-level window updates stay legal
        let update = Frame::WindowUpdate(WindowUpdateFrame { stream_id: 0, delta: 1 });
        assert_eq!(decode_one(&FrameCodec::encode(&update)), update);
    }

    #[test]
    fn test_frame_length_limit() {
        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_length(1024);
        // Only the header of a 0xFFFFFF byte DATA frame
        decoder.feed(&[0x00, 0x00, 0x00, 0x01, 0x00, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(decoder.decode(), Err(Error::FrameSize(_))));
        assert!(decoder.buffer.capacity() < 0x00FF_FFFF);

        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_length(5);
        decoder.feed(&FrameCodec::encode(&Frame::Data(DataFrame::new(1, Bytes::from_static(b"hello"), true))));
        assert!(matches!(decoder.decode(), Ok(Some(Frame::Data(_)))));

        decoder.set_max_frame_length(usize::MAX);
        assert_eq!(decoder.max_frame_length(), MAX_FRAME_LENGTH);
    }
}
