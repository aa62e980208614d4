//! SPDY connection multiplexer
//!
//! A [`Connection`] owns one transport and everything shared by its
//! streams: the frame decoder, both header compression contexts, the flow
//! control ledger and the stream map. It is driven by one caller through
//! `&mut self`: [`Connection::process`] reads and dispatches one frame,
//! [`Connection::flush`] writes whatever the streams queued. Things the
//! caller has to react to surface as [`Event`]s.

use super::codec::{FrameCodec, FrameDecoder};
use super::compression::{HeaderDecoder, HeaderEncoder};
use super::config::ConnectionConfig;
use super::error::{Error, GoawayStatus, Result, RstStatus};
use super::flow_control::{FlowLedger, ReceiveWindow, WindowScope};
use super::frames::*;
use super::negotiate::Protocol;
use super::pool::BufferPool;
use super::settings::{SettingId, Settings};
use super::stream::{Completion, PendingSend, SendCallback, StreamId, StreamManager, StreamState};
use super::{CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::http::{Headers, HttpSession, SessionOps};
use bytes::{Bytes, BytesMut};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::{debug, trace, warn};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Idle header work buffers kept per connection
const MAX_IDLE_HEADER_BUFFERS: usize = 8;

/// Which end of the connection this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens odd-numbered streams
    Client,
    /// Opens even-numbered streams
    Server,
}

impl Role {
    pub fn is_client(&self) -> bool {
        matches!(self, Role::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Something the connection's driver should react to
#[derive(Debug)]
pub enum Event {
    /// A peer-opened stream delivered its FIN; reply with
    /// [`Connection::reply`]
    IncomingRequest {
        stream_id: StreamId,
        headers: Headers,
        body: Bytes,
    },
    /// Echo of a PING sent with [`Connection::ping`]
    Pong { id: u32 },
    /// The peer will not accept new streams
    GoAway {
        last_good_stream_id: StreamId,
        status: Option<GoawayStatus>,
    },
    /// The peer reset a stream
    StreamReset {
        stream_id: StreamId,
        status: Option<RstStatus>,
    },
}

/// SPDY connection
pub struct Connection<S: SessionOps> {
    session: HttpSession<S>,
    role: Role,
    protocol: Protocol,
    config: ConnectionConfig,
    decoder: FrameDecoder,
    /// Compression contexts; dropped at teardown
    header_encoder: Option<HeaderEncoder>,
    header_decoder: Option<HeaderDecoder>,
    ledger: FlowLedger,
    /// Connection receive window, spdy/3.1 only
    recv_window: Option<ReceiveWindow>,
    streams: StreamManager,
    local_settings: Settings,
    remote_settings: Settings,
    outbound: BytesMut,
    /// Transport read buffer, reused across `process` calls
    read_buf: Vec<u8>,
    /// Send callbacks whose data is framed and waits for the next write
    written: Vec<SendCallback>,
    events: VecDeque<Event>,
    next_ping_id: u32,
    outstanding_pings: HashSet<u32>,
    /// We sent GOAWAY
    going_away: bool,
    /// The peer sent GOAWAY
    peer_going_away: bool,
    closed: bool,
}

impl<S: SessionOps> Connection<S> {
    /// Create a connection on a transport that has not been read from
    pub fn new(session: S, role: Role, protocol: Protocol, config: ConnectionConfig) -> Result<Self> {
        Self::with_preread(session, role, protocol, config, &[])
    }

    /// Create a connection whose first input bytes were already read
    ///
    /// `preread` is decoded before anything is read from the transport.
    pub fn with_preread(
        session: S,
        role: Role,
        protocol: Protocol,
        config: ConnectionConfig,
        preread: &[u8],
    ) -> Result<Self> {
        if !protocol.is_spdy() {
            return Err(Error::Protocol(format!("{} is not a SPDY protocol", protocol)));
        }
        config.validate()?;
        let local_settings = config.local_settings()?;

        let pool = BufferPool::new(config.header_buffer_size, MAX_IDLE_HEADER_BUFFERS);
        let header_encoder = HeaderEncoder::new(pool)?;

        let mut session = HttpSession::new(session);
        session.set_timeout(config.idle_timeout);

        let mut streams = StreamManager::new(role.is_client());
        streams.set_local_max_concurrent(config.max_concurrent_streams);

        let mut decoder = FrameDecoder::with_preread(preread);
        decoder.set_max_frame_length(config.max_inbound_frame_size);

        let mut connection = Connection {
            session,
            role,
            protocol,
            decoder,
            header_encoder: Some(header_encoder),
            header_decoder: Some(HeaderDecoder::new()),
            ledger: FlowLedger::new(protocol.has_connection_flow_control()),
            recv_window: None,
            streams,
            local_settings: local_settings.clone(),
            remote_settings: Settings::new(),
            outbound: BytesMut::with_capacity(4096),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            written: Vec::new(),
            events: VecDeque::new(),
            next_ping_id: if role.is_client() { 1 } else { 2 },
            outstanding_pings: HashSet::new(),
            going_away: false,
            peer_going_away: false,
            closed: false,
            config,
        };

        connection.queue_frame(&Frame::Settings(SettingsFrame {
            clear: false,
            entries: local_settings.to_entries(),
        }));

        if protocol.has_connection_flow_control() {
            let mut window_size = DEFAULT_INITIAL_WINDOW_SIZE;
            if role == Role::Server && connection.config.initial_window_size > DEFAULT_INITIAL_WINDOW_SIZE {
                window_size = connection.config.initial_window_size;
                connection.queue_frame(&Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: CONNECTION_STREAM_ID,
                    delta: window_size - DEFAULT_INITIAL_WINDOW_SIZE,
                }));
            }
            connection.recv_window = Some(ReceiveWindow::new(window_size));
        }

        debug!(
            role = %role,
            protocol = %protocol,
            preread = preread.len(),
            "SPDY connection established"
        );
        Ok(connection)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    /// Settings the peer has sent so far
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether either side has sent GOAWAY
    pub fn is_going_away(&self) -> bool {
        self.going_away || self.peer_going_away
    }

    /// Streams not yet closed
    pub fn active_streams(&self) -> usize {
        self.streams.active_stream_count()
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get_stream(stream_id).map(|s| s.state())
    }

    /// Current send window of a stream
    pub fn send_window(&self, stream_id: StreamId) -> Option<i64> {
        self.ledger.stream_window(stream_id)
    }

    /// Current connection send window, spdy/3.1 only
    pub fn connection_window(&self) -> Option<i64> {
        self.ledger.connection_window()
    }

    /// Next queued event
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn get_ref(&self) -> &S {
        self.session.get_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn queue_frame(&mut self, frame: &Frame) {
        trace!(frame = frame.name(), stream_id = frame.stream_id(), "queued frame");
        FrameCodec::encode_into(&mut self.outbound, frame);
    }

    fn encode_block(&mut self, headers: &Headers) -> Result<Bytes> {
        let encoder = self.header_encoder.as_mut().ok_or(Error::ConnectionClosed)?;
        Ok(Bytes::from(encoder.encode(headers)?.to_vec()))
    }

    fn decode_block(&mut self, block: &[u8]) -> Result<Headers> {
        let decoder = self.header_decoder.as_mut().ok_or(Error::ConnectionClosed)?;
        decoder.decode(block)
    }

    /// Open a stream with a SYN_STREAM
    ///
    /// Client only. `completion` fires once, when the stream closes or
    /// fails. If this returns an error the stream was never opened and the
    /// completion is dropped without being called.
    pub fn open_stream(&mut self, headers: Headers, fin: bool, completion: Option<Completion>) -> Result<StreamId> {
        self.ensure_open()?;
        if !self.role.is_client() {
            return Err(Error::Protocol("server push is not supported".to_string()));
        }
        if self.is_going_away() {
            return Err(Error::GoingAway);
        }

        let stream_id = self.streams.create_stream(self.config.initial_window_size)?;
        let header_block = match self.encode_block(&headers) {
            Ok(block) => block,
            Err(e) => {
                // Nothing reached the wire; the id is simply skipped
                self.streams.remove_stream(stream_id);
                return Err(e);
            }
        };

        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.send_headers(fin)?;
            if let Some(completion) = completion {
                stream.set_completion(completion);
            }
        }
        self.ledger.open_stream(stream_id);

        self.queue_frame(&Frame::SynStream(SynStreamFrame {
            stream_id,
            associated_stream_id: 0,
            priority: 0,
            slot: 0,
            fin,
            unidirectional: false,
            header_block,
        }));
        debug!(stream_id, fin, "opened stream");
        Ok(stream_id)
    }

    /// Answer a peer-opened stream with a SYN_REPLY
    pub fn reply(&mut self, stream_id: StreamId, headers: Headers, fin: bool) -> Result<()> {
        self.ensure_open()?;
        let stream = self
            .streams
            .get_stream(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        if stream.is_local() {
            return Err(Error::Protocol(format!(
                "cannot reply on locally opened stream {}",
                stream_id
            )));
        }

        let header_block = self.outbound_block(stream_id, &headers, fin)?;
        self.queue_frame(&Frame::SynReply(SynReplyFrame {
            stream_id,
            fin,
            header_block,
        }));
        self.finish_if_closed(stream_id);
        Ok(())
    }

    /// Send a HEADERS frame on an open stream
    pub fn send_headers(&mut self, stream_id: StreamId, headers: Headers, fin: bool) -> Result<()> {
        self.ensure_open()?;
        let header_block = self.outbound_block(stream_id, &headers, fin)?;
        self.queue_frame(&Frame::Headers(HeadersFrame {
            stream_id,
            fin,
            header_block,
        }));
        self.finish_if_closed(stream_id);
        Ok(())
    }

    /// Compress a header block for a stream and advance its state
    ///
    /// A block that cannot be encoded resets the stream.
    fn outbound_block(&mut self, stream_id: StreamId, headers: &Headers, fin: bool) -> Result<Bytes> {
        let can_send = self
            .streams
            .get_stream(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?
            .state()
            .can_send();
        if !can_send {
            return Err(Error::StreamClosed(stream_id));
        }

        let block = match self.encode_block(headers) {
            Ok(block) => block,
            Err(e) if !e.is_connection_error() => {
                warn!(stream_id, error = %e, "cannot encode headers");
                self.rst_stream(stream_id, e.rst_status());
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.send_headers(fin)?;
        }
        Ok(block)
    }

    /// Queue data on a stream
    ///
    /// The data is sent as flow control allows, split into frames of at
    /// most `max_frame_payload` bytes.
    pub fn send_data(&mut self, stream_id: StreamId, data: Bytes, fin: bool) -> Result<()> {
        self.send_data_with(stream_id, data, fin, None)
    }

    /// Queue data on a stream, calling `done` once it has been written
    ///
    /// If the stream is reset or the connection closes first, `done` gets
    /// the error instead.
    pub fn send_data_with(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        fin: bool,
        done: Option<SendCallback>,
    ) -> Result<()> {
        self.ensure_open()?;
        let stream = self
            .streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        trace!(stream_id, len = data.len(), fin, "queued data");
        stream.queue_send(PendingSend::new(data, fin, done))
    }

    /// Reset a stream with RST_STREAM
    pub fn reset(&mut self, stream_id: StreamId, status: RstStatus) -> Result<()> {
        self.ensure_open()?;
        self.rst_stream(stream_id, status);
        Ok(())
    }

    /// Send a PING, returning its id
    ///
    /// The echo surfaces as [`Event::Pong`].
    pub fn ping(&mut self) -> Result<u32> {
        self.ensure_open()?;
        let id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(2);
        self.outstanding_pings.insert(id);
        self.queue_frame(&Frame::Ping(PingFrame { id }));
        Ok(id)
    }

    /// Send GOAWAY; no further peer streams are accepted
    pub fn go_away(&mut self, status: GoawayStatus) -> Result<()> {
        self.ensure_open()?;
        if !self.going_away {
            self.going_away = true;
            let last_good_stream_id = self.streams.last_peer_id();
            debug!(last_good_stream_id, status = %status, "sending GOAWAY");
            self.queue_frame(&Frame::Goaway(GoawayFrame::new(last_good_stream_id, status)));
        }
        Ok(())
    }

    /// Frame pending data under flow control and write everything queued
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.pump_pending()?;

        if !self.outbound.is_empty() {
            let out = self.outbound.split();
            trace!(len = out.len(), "writing");
            if let Err(e) = self.session.write_all(&out) {
                return Err(self.transport_error(e));
            }
        }

        for done in self.written.drain(..) {
            done(Ok(()));
        }
        Ok(())
    }

    /// Move queued stream data into DATA frames as windows allow
    fn pump_pending(&mut self) -> Result<()> {
        for stream_id in self.streams.stream_ids() {
            loop {
                let stream = match self.streams.get_stream_mut(stream_id) {
                    Some(stream) if !stream.is_blocked() => stream,
                    _ => break,
                };
                let pending = match stream.pending_front_mut() {
                    Some(pending) => pending,
                    None => break,
                };

                let chunk = if pending.data.is_empty() {
                    // An empty frame carries no payload and needs no credit
                    Bytes::new()
                } else {
                    let want = pending.data.len().min(self.config.max_frame_payload);
                    let granted = self.ledger.grantable(stream_id, want)?;
                    if granted == 0 {
                        trace!(stream_id, "send window exhausted, suspending stream");
                        stream.set_blocked(true);
                        break;
                    }
                    pending.data.split_to(granted)
                };

                let last = pending.data.is_empty();
                let fin = last && pending.fin;
                trace!(stream_id, len = chunk.len(), fin, "framing data");
                FrameCodec::encode_data(&mut self.outbound, stream_id, &chunk, fin);

                if last {
                    if let Some(send) = stream.pop_pending() {
                        if send.fin {
                            stream.mark_sent_fin();
                        }
                        if let Some(done) = send.done {
                            self.written.push(done);
                        }
                    }
                }
            }
            self.finish_if_closed(stream_id);
        }
        Ok(())
    }

    /// Read and dispatch one frame
    ///
    /// Frames already buffered (including pre-read bytes) are dispatched
    /// before the transport is read. Returns `Ok(false)` once the
    /// connection is finished: the peer closed the transport, or GOAWAY was
    /// received and no streams remain.
    pub fn process(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.flush()?;

        loop {
            match self.decoder.decode() {
                Ok(Some(frame)) => {
                    self.dispatch(frame)?;
                    break;
                }
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }

            match self.session.read(&mut self.read_buf) {
                Ok(0) => {
                    debug!(role = %self.role, "transport closed by peer");
                    self.teardown();
                    return Ok(false);
                }
                Ok(n) => {
                    trace!(len = n, "read");
                    self.decoder.feed(&self.read_buf[..n]);
                }
                Err(e) if e.is_would_block() => continue,
                Err(e) => return Err(self.transport_error(e)),
            }
        }

        if self.closed {
            return Ok(false);
        }
        self.flush()?;

        if self.peer_going_away && self.streams.is_empty() {
            debug!("GOAWAY received and no streams remain");
            self.teardown();
            return Ok(false);
        }
        Ok(true)
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let result = match frame {
            Frame::Data(f) => self.on_data(f),
            Frame::SynStream(f) => self.on_syn_stream(f),
            Frame::SynReply(f) => self.on_syn_reply(f),
            Frame::Headers(f) => self.on_headers(f),
            Frame::RstStream(f) => {
                self.on_rst_stream(f);
                Ok(())
            }
            Frame::Settings(f) => self.on_settings(f),
            Frame::Ping(f) => {
                self.on_ping(f);
                Ok(())
            }
            Frame::Goaway(f) => {
                self.on_goaway(f);
                Ok(())
            }
            Frame::WindowUpdate(f) => self.on_window_update(f),
            Frame::Unknown { frame_type, length, .. } => {
                debug!(frame_type, length, "skipping unknown control frame");
                Ok(())
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_error() => Err(self.fail(e)),
            Err(e) => {
                warn!(error = %e, "stream error");
                Ok(())
            }
        }
    }

    /// Decode an inbound header block
    ///
    /// Decoding happens for every block, whatever stream it addresses, so
    /// the shared context never skips one. A malformed block resets the
    /// stream and yields `None`.
    fn inbound_block(&mut self, stream_id: StreamId, block: &[u8]) -> Result<Option<Headers>> {
        match self.decode_block(block) {
            Ok(headers) => Ok(Some(headers)),
            Err(e) if e.is_connection_error() => Err(e),
            Err(e) => {
                warn!(stream_id, error = %e, "rejecting header block");
                self.rst_stream(stream_id, RstStatus::ProtocolError);
                Ok(None)
            }
        }
    }

    fn on_syn_stream(&mut self, frame: SynStreamFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        let headers = match self.inbound_block(stream_id, &frame.header_block)? {
            Some(headers) => headers,
            None => return Ok(()),
        };

        if self.role.is_client() {
            warn!(stream_id, associated = frame.associated_stream_id, "refusing pushed stream");
            self.send_rst(stream_id, RstStatus::RefusedStream);
            return Ok(());
        }
        if self.going_away {
            debug!(stream_id, "refusing stream after GOAWAY");
            self.send_rst(stream_id, RstStatus::RefusedStream);
            return Ok(());
        }

        if let Err(e) = self.streams.accept_remote(stream_id, self.config.initial_window_size) {
            let status = e.rst_status();
            warn!(stream_id, status = %status, "rejecting SYN_STREAM");
            if status == RstStatus::StreamInUse {
                self.rst_stream(stream_id, status);
            } else {
                self.send_rst(stream_id, status);
            }
            return Ok(());
        }
        self.ledger.open_stream(stream_id);

        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.receive_headers(headers, frame.fin)?;
        }
        debug!(stream_id, fin = frame.fin, "accepted stream");

        if frame.fin {
            self.after_remote_fin(stream_id);
        }
        Ok(())
    }

    fn on_syn_reply(&mut self, frame: SynReplyFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        let headers = match self.inbound_block(stream_id, &frame.header_block)? {
            Some(headers) => headers,
            None => return Ok(()),
        };

        let outcome = match self.streams.get_stream_mut(stream_id) {
            None => Err(Error::StreamNotFound(stream_id)),
            Some(stream) if !stream.is_local() => Err(Error::StreamReset {
                stream_id,
                status: RstStatus::ProtocolError,
            }),
            Some(stream) => stream.receive_reply(headers, frame.fin),
        };
        if let Err(e) = outcome {
            self.reject_frame(stream_id, "SYN_REPLY", e);
            return Ok(());
        }

        if frame.fin {
            self.after_remote_fin(stream_id);
        }
        Ok(())
    }

    fn on_headers(&mut self, frame: HeadersFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        let headers = match self.inbound_block(stream_id, &frame.header_block)? {
            Some(headers) => headers,
            None => return Ok(()),
        };

        let outcome = match self.streams.get_stream_mut(stream_id) {
            None => Err(Error::StreamNotFound(stream_id)),
            Some(stream) => stream.receive_headers(headers, frame.fin),
        };
        if let Err(e) = outcome {
            self.reject_frame(stream_id, "HEADERS", e);
            return Ok(());
        }

        if frame.fin {
            self.after_remote_fin(stream_id);
        }
        Ok(())
    }

    fn on_data(&mut self, frame: DataFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        let len = frame.data.len();

        if let Some(window) = self.recv_window.as_mut() {
            if let Err(e) = window.consume(len) {
                return Err(Error::Protocol(format!("connection {}", e)));
            }
        }

        let outcome = match self.streams.get_stream_mut(stream_id) {
            None => Err(Error::StreamNotFound(stream_id)),
            Some(stream) => stream.receive_data(&frame.data, frame.fin).map(|()| {
                // Top up the stream window while the peer may still send
                match stream.recv_window().should_send_window_update() {
                    Some(increment) if stream.state().can_receive() => {
                        stream.recv_window_mut().acknowledge(increment).ok().map(|_| increment)
                    }
                    _ => None,
                }
            }),
        };

        match outcome {
            Ok(update) => {
                trace!(stream_id, len, fin = frame.fin, "received data");
                if let Some(delta) = update {
                    self.queue_frame(&Frame::WindowUpdate(WindowUpdateFrame { stream_id, delta }));
                }
                if frame.fin {
                    self.after_remote_fin(stream_id);
                }
            }
            Err(e) => self.reject_frame(stream_id, "DATA", e),
        }

        if let Some(window) = self.recv_window.as_mut() {
            if let Some(delta) = window.should_send_window_update() {
                window.acknowledge(delta)?;
                self.queue_frame(&Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: CONNECTION_STREAM_ID,
                    delta,
                }));
            }
        }
        Ok(())
    }

    /// Answer a stream-level violation with RST_STREAM
    fn reject_frame(&mut self, stream_id: StreamId, frame: &'static str, error: Error) {
        let status = error.rst_status();
        warn!(stream_id, frame, status = %status, error = %error, "rejecting frame");
        if matches!(error, Error::StreamNotFound(_)) {
            self.send_rst(stream_id, status);
        } else {
            self.rst_stream(stream_id, status);
        }
    }

    /// The peer finished sending on a stream
    fn after_remote_fin(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            if !stream.is_local() {
                let (headers, body) = stream.take_request();
                debug!(stream_id, len = body.len(), "request complete");
                self.events.push_back(Event::IncomingRequest {
                    stream_id,
                    headers,
                    body,
                });
            }
        }
        self.finish_if_closed(stream_id);
    }

    /// Drop a stream that has closed in both directions
    fn finish_if_closed(&mut self, stream_id: StreamId) {
        let closed = self
            .streams
            .get_stream(stream_id)
            .map_or(false, |s| s.state().is_closed());
        if !closed {
            return;
        }
        if let Some(mut stream) = self.streams.remove_stream(stream_id) {
            stream.complete();
        }
        self.ledger.close_stream(stream_id);
        debug!(stream_id, "stream closed");
    }

    fn on_rst_stream(&mut self, frame: RstStreamFrame) {
        let stream_id = frame.stream_id;
        let status = frame.status();
        warn!(stream_id, status_code = frame.status_code, "stream reset by peer");

        if let Some(mut stream) = self.streams.remove_stream(stream_id) {
            stream.reset(status.unwrap_or(RstStatus::ProtocolError));
        }
        self.ledger.close_stream(stream_id);
        self.events.push_back(Event::StreamReset { stream_id, status });
    }

    fn on_settings(&mut self, frame: SettingsFrame) -> Result<()> {
        if frame.clear {
            self.remote_settings.clear();
        }
        let changed = self.remote_settings.apply(&frame.entries)?;

        for id in changed {
            match id {
                SettingId::MaxConcurrentStreams => {
                    self.streams
                        .set_peer_max_concurrent(self.remote_settings.max_concurrent_streams());
                }
                SettingId::InitialWindowSize => {
                    let size = self.remote_settings.initial_window_size().unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE);
                    for stream_id in self.ledger.set_initial_window(size) {
                        warn!(stream_id, "initial window change overflows stream window");
                        self.rst_stream(stream_id, RstStatus::FlowControlError);
                    }
                    self.unblock_all();
                }
                _ => {}
            }
        }
        debug!(entries = frame.entries.len(), "applied peer settings");
        Ok(())
    }

    fn on_ping(&mut self, frame: PingFrame) {
        let ours = (frame.id % 2 == 1) == self.role.is_client();
        if !ours {
            trace!(id = frame.id, "echoing ping");
            self.queue_frame(&Frame::Ping(frame));
        } else if self.outstanding_pings.remove(&frame.id) {
            self.events.push_back(Event::Pong { id: frame.id });
        } else {
            debug!(id = frame.id, "ignoring unsolicited ping echo");
        }
    }

    fn on_goaway(&mut self, frame: GoawayFrame) {
        let last_good_stream_id = frame.last_good_stream_id;
        debug!(last_good_stream_id, status_code = frame.status_code, "peer going away");
        self.peer_going_away = true;

        for stream_id in self.streams.stream_ids() {
            if self.streams.is_local_id(stream_id) && stream_id > last_good_stream_id {
                if let Some(mut stream) = self.streams.remove_stream(stream_id) {
                    stream.reset(RstStatus::RefusedStream);
                }
                self.ledger.close_stream(stream_id);
            }
        }

        self.events.push_back(Event::GoAway {
            last_good_stream_id,
            status: frame.status(),
        });
    }

    fn on_window_update(&mut self, frame: WindowUpdateFrame) -> Result<()> {
        let scope = WindowScope::from_stream_id(frame.stream_id);
        if frame.delta == 0 {
            return match scope {
                WindowScope::Connection => Err(Error::Protocol(
                    "WINDOW_UPDATE with zero delta on the connection".to_string(),
                )),
                WindowScope::Stream(stream_id) => {
                    warn!(stream_id, "WINDOW_UPDATE with zero delta");
                    self.rst_stream(stream_id, RstStatus::ProtocolError);
                    Ok(())
                }
            };
        }
        if scope == WindowScope::Connection && !self.protocol.has_connection_flow_control() {
            trace!(delta = frame.delta, "ignoring connection WINDOW_UPDATE under spdy/3");
            return Ok(());
        }

        match self.ledger.apply_window_update(scope, frame.delta) {
            Ok(true) => {
                trace!(stream_id = frame.stream_id, delta = frame.delta, "window reopened");
                match scope {
                    WindowScope::Connection => self.unblock_all(),
                    WindowScope::Stream(stream_id) => {
                        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
                            stream.set_blocked(false);
                        }
                    }
                }
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => match scope {
                WindowScope::Connection => Err(Error::Protocol(format!("connection {}", e))),
                WindowScope::Stream(stream_id) => {
                    warn!(stream_id, error = %e, "stream window overflow");
                    self.rst_stream(stream_id, RstStatus::FlowControlError);
                    Ok(())
                }
            },
        }
    }

    fn unblock_all(&mut self) {
        for stream_id in self.streams.stream_ids() {
            if let Some(stream) = self.streams.get_stream_mut(stream_id) {
                stream.set_blocked(false);
            }
        }
    }

    /// Queue RST_STREAM without touching local state
    fn send_rst(&mut self, stream_id: StreamId, status: RstStatus) {
        // RST_STREAM never names the connection
        if stream_id == CONNECTION_STREAM_ID {
            return;
        }
        self.queue_frame(&Frame::RstStream(RstStreamFrame::new(stream_id, status)));
    }

    /// Queue RST_STREAM and fail the stream
    fn rst_stream(&mut self, stream_id: StreamId, status: RstStatus) {
        warn!(stream_id, status = %status, "resetting stream");
        self.send_rst(stream_id, status);
        if let Some(mut stream) = self.streams.remove_stream(stream_id) {
            stream.reset(status);
        }
        self.ledger.close_stream(stream_id);
    }

    /// Tear down after a fatal protocol error, telling the peer first
    fn fail(&mut self, error: Error) -> Error {
        warn!(error = %error, "fatal connection error");
        if !self.closed {
            let goaway = GoawayFrame::new(self.streams.last_peer_id(), GoawayStatus::ProtocolError);
            FrameCodec::encode_goaway(&mut self.outbound, &goaway);
            let out = self.outbound.split();
            // Best effort; the connection is going down either way
            let _ = self.session.write_all(&out);
            self.teardown();
        }
        error
    }

    fn transport_error(&mut self, error: crate::http::Error) -> Error {
        debug!(error = %error, "transport failed");
        self.teardown();
        match error {
            crate::http::Error::Timeout => Error::Timeout,
            crate::http::Error::ConnectionClosed => Error::ConnectionClosed,
            other => Error::Http(other),
        }
    }

    /// Fail everything still waiting and release the connection's state
    ///
    /// Every pending send and completion gets `ConnectionClosed` exactly
    /// once before the compression contexts are dropped.
    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let streams = self.streams.drain();
        let failed = streams.len();
        for mut stream in streams {
            stream.fail_with(|| Error::ConnectionClosed);
            self.ledger.close_stream(stream.id());
        }
        for done in self.written.drain(..) {
            done(Err(Error::ConnectionClosed));
        }

        self.header_encoder = None;
        self.header_decoder = None;
        self.outbound.clear();
        debug!(role = %self.role, failed_streams = failed, "connection torn down");
    }

    /// Send GOAWAY, flush and close the transport
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.go_away(GoawayStatus::Ok)?;
        let flushed = self.flush();
        self.teardown();
        let closed = self.session.close().map_err(Error::from);
        flushed.and(closed)
    }
}

impl<S: SessionOps> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("protocol", &self.protocol)
            .field("streams", &self.streams)
            .field("closed", &self.closed)
            .finish()
    }
}
