//! SPDY stream management
//!
//! A stream is one request/response exchange. Its state machine follows
//! SPDY/3 section 2.3: a FIN from either side half-closes the stream, FINs
//! from both sides close it, and RST_STREAM closes it immediately.

use super::error::{Error, Result, RstStatus};
use super::flow_control::ReceiveWindow;
use super::MAX_STREAM_ID;
use crate::http::Headers;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Stream ID type
pub type StreamId = u32;

/// Called once when queued data has been written, or has failed
pub type SendCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Called once when a locally opened stream finishes, or fails
pub type Completion = Box<dyn FnOnce(Result<Exchange>) + Send>;

/// Stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We sent FIN, they can still send
    HalfClosedLocal,
    /// Half-closed (remote): They sent FIN, we can still send
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// Finished exchange handed to a stream's completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub stream_id: StreamId,
    pub headers: Headers,
    pub body: Bytes,
}

impl Exchange {
    /// Numeric `:status`, e.g. 200 for `200 OK`
    pub fn status(&self) -> Option<u16> {
        self.headers
            .get(":status")
            .and_then(|s| s.split_whitespace().next())
            .and_then(|code| code.parse().ok())
    }
}

/// Outbound data waiting for flow control credit
pub struct PendingSend {
    pub data: Bytes,
    pub fin: bool,
    pub done: Option<SendCallback>,
}

impl PendingSend {
    pub fn new(data: Bytes, fin: bool, done: Option<SendCallback>) -> Self {
        PendingSend { data, fin, done }
    }
}

impl fmt::Debug for PendingSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSend")
            .field("len", &self.data.len())
            .field("fin", &self.fin)
            .field("callback", &self.done.is_some())
            .finish()
    }
}

/// SPDY stream
pub struct SpdyStream {
    id: StreamId,
    state: StreamState,
    /// Opened by this endpoint
    local: bool,
    recv_window: ReceiveWindow,
    /// Headers received so far (SYN_STREAM or SYN_REPLY plus HEADERS)
    headers: Headers,
    body: BytesMut,
    reply_received: bool,
    /// Flow control suspended this stream's sends
    blocked: bool,
    pending: VecDeque<PendingSend>,
    completion: Option<Completion>,
}

impl SpdyStream {
    /// Create a new stream
    pub fn new(id: StreamId, local: bool, recv_window_size: u32) -> Self {
        SpdyStream {
            id,
            state: StreamState::Idle,
            local,
            recv_window: ReceiveWindow::new(recv_window_size),
            headers: Headers::new(),
            body: BytesMut::new(),
            reply_received: false,
            blocked: false,
            pending: VecDeque::new(),
            completion: None,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn recv_window(&self) -> &ReceiveWindow {
        &self.recv_window
    }

    pub fn recv_window_mut(&mut self) -> &mut ReceiveWindow {
        &mut self.recv_window
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub fn set_completion(&mut self, completion: Completion) {
        self.completion = Some(completion);
    }

    /// Record a SYN_REPLY; a second one is a stream error
    pub fn receive_reply(&mut self, headers: Headers, fin: bool) -> Result<()> {
        if self.reply_received {
            return Err(Error::StreamReset {
                stream_id: self.id,
                status: RstStatus::StreamInUse,
            });
        }
        self.reply_received = true;
        self.receive_headers(headers, fin)
    }

    /// Process an inbound header block (SYN_STREAM, SYN_REPLY or HEADERS)
    pub fn receive_headers(&mut self, headers: Headers, fin: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if fin {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                if fin {
                    self.remote_fin();
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::StreamClosed(self.id));
            }
        }

        self.headers.extend(headers);
        Ok(())
    }

    /// Process an inbound DATA payload
    pub fn receive_data(&mut self, data: &[u8], fin: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        self.recv_window.consume(data.len())?;
        self.body.extend_from_slice(data);

        if fin {
            self.remote_fin();
        }
        Ok(())
    }

    fn remote_fin(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Prepare to send a header block
    pub fn send_headers(&mut self, fin: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if fin {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
            }
            StreamState::Open | StreamState::HalfClosedRemote => {
                if fin {
                    self.mark_sent_fin();
                }
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "Cannot send headers on stream {} in state {:?}",
                    self.id, self.state
                )));
            }
        }
        Ok(())
    }

    /// Record that our FIN went out
    pub fn mark_sent_fin(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Queue data for the flow-controlled send path
    pub fn queue_send(&mut self, send: PendingSend) -> Result<()> {
        let fin_queued = self.pending.back().map_or(false, |p| p.fin);
        if !self.state.can_send() || fin_queued {
            return Err(Error::StreamClosed(self.id));
        }
        self.pending.push_back(send);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn pending_front_mut(&mut self) -> Option<&mut PendingSend> {
        self.pending.front_mut()
    }

    pub(crate) fn pop_pending(&mut self) -> Option<PendingSend> {
        self.pending.pop_front()
    }

    /// Fire the completion with the received exchange once the stream closed
    ///
    /// Returns whether the completion fired.
    pub fn complete(&mut self) -> bool {
        if !self.state.is_closed() {
            return false;
        }
        match self.completion.take() {
            Some(completion) => {
                completion(Ok(Exchange {
                    stream_id: self.id,
                    headers: std::mem::take(&mut self.headers),
                    body: std::mem::take(&mut self.body).freeze(),
                }));
                true
            }
            None => false,
        }
    }

    /// Take what the peer sent, for the server side
    pub fn take_request(&mut self) -> (Headers, Bytes) {
        (
            std::mem::take(&mut self.headers),
            std::mem::take(&mut self.body).freeze(),
        )
    }

    /// Reset the stream
    ///
    /// Closes the stream and fails every pending send and the completion
    /// with a stream-reset error.
    pub fn reset(&mut self, status: RstStatus) {
        let id = self.id;
        self.fail_with(|| Error::StreamReset { stream_id: id, status });
    }

    /// Close the stream, failing everything still waiting on it
    pub fn fail_with<F: Fn() -> Error>(&mut self, error: F) {
        self.state = StreamState::Closed;
        for send in self.pending.drain(..) {
            if let Some(done) = send.done {
                done(Err(error()));
            }
        }
        if let Some(completion) = self.completion.take() {
            completion(Err(error()));
        }
        self.headers = Headers::new();
        self.body.clear();
    }
}

impl fmt::Debug for SpdyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpdyStream")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("local", &self.local)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Stream manager
///
/// Manages all streams for a connection
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, SpdyStream>,
    /// Next stream ID (client: odd, server: even)
    next_stream_id: StreamId,
    /// Highest stream ID the peer has opened
    last_peer_id: StreamId,
    is_client: bool,
    /// Streams the peer lets us open (its MAX_CONCURRENT_STREAMS)
    peer_max_concurrent: Option<u32>,
    /// Streams we let the peer open
    local_max_concurrent: Option<u32>,
}

impl StreamManager {
    /// Create a new stream manager
    ///
    /// # Arguments
    /// * `is_client` - True if this is a client (odd stream IDs), false for server (even)
    pub fn new(is_client: bool) -> Self {
        StreamManager {
            streams: HashMap::new(),
            next_stream_id: if is_client { 1 } else { 2 },
            last_peer_id: 0,
            is_client,
            peer_max_concurrent: None,
            local_max_concurrent: None,
        }
    }

    pub fn set_peer_max_concurrent(&mut self, max: Option<u32>) {
        self.peer_max_concurrent = max;
    }

    pub fn set_local_max_concurrent(&mut self, max: Option<u32>) {
        self.local_max_concurrent = max;
    }

    /// Get next stream ID (without incrementing)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    /// Highest stream ID opened by the peer so far
    pub fn last_peer_id(&self) -> StreamId {
        self.last_peer_id
    }

    /// Whether an id belongs to streams this endpoint opens
    pub fn is_local_id(&self, stream_id: StreamId) -> bool {
        (stream_id % 2 == 1) == self.is_client
    }

    fn active_count(&self, local: bool) -> usize {
        self.streams
            .values()
            .filter(|s| s.is_local() == local && !s.state().is_closed())
            .count()
    }

    /// Allocate next stream ID and create stream
    pub fn create_stream(&mut self, recv_window_size: u32) -> Result<StreamId> {
        if let Some(max) = self.peer_max_concurrent {
            if self.active_count(true) >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }
        if self.next_stream_id > MAX_STREAM_ID {
            return Err(Error::Protocol("Stream IDs exhausted".to_string()));
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;
        self.streams
            .insert(stream_id, SpdyStream::new(stream_id, true, recv_window_size));
        Ok(stream_id)
    }

    /// Register a stream opened by the peer's SYN_STREAM
    ///
    /// Errors are stream-level resets carrying the status to send.
    pub fn accept_remote(&mut self, stream_id: StreamId, recv_window_size: u32) -> Result<()> {
        let refuse = |status| Error::StreamReset { stream_id, status };

        if self.streams.contains_key(&stream_id) {
            return Err(refuse(RstStatus::StreamInUse));
        }
        if stream_id == 0 || self.is_local_id(stream_id) || stream_id <= self.last_peer_id {
            return Err(refuse(RstStatus::ProtocolError));
        }
        self.last_peer_id = stream_id;

        if let Some(max) = self.local_max_concurrent {
            if self.active_count(false) >= max as usize {
                return Err(refuse(RstStatus::RefusedStream));
            }
        }

        self.streams
            .insert(stream_id, SpdyStream::new(stream_id, false, recv_window_size));
        Ok(())
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: StreamId) -> Option<&SpdyStream> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut SpdyStream> {
        self.streams.get_mut(&stream_id)
    }

    /// Remove a stream
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<SpdyStream> {
        self.streams.remove(&stream_id)
    }

    /// Get number of active streams
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Get all stream IDs, in ascending order
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Remove every stream
    pub fn drain(&mut self) -> Vec<SpdyStream> {
        self.streams.drain().map(|(_, stream)| stream).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_stream_state_transitions() {
        let mut stream = SpdyStream::new(1, true, 65536);
        assert_eq!(stream.state(), StreamState::Idle);

        stream.send_headers(false).unwrap();
        assert_eq!(stream.state(), StreamState::Open);

        stream.mark_sent_fin();
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);

        stream.receive_data(b"ok", true).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_fin_on_syn_half_closes() {
        let mut stream = SpdyStream::new(1, true, 65536);
        stream.send_headers(true).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);

        stream.receive_reply(headers(&[(":status", "200")]), true).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_duplicate_reply_is_stream_in_use() {
        let mut stream = SpdyStream::new(1, true, 65536);
        stream.send_headers(false).unwrap();
        stream.receive_reply(Headers::new(), false).unwrap();
        let err = stream.receive_reply(Headers::new(), false).unwrap_err();
        assert_eq!(err.rst_status(), RstStatus::StreamInUse);
    }

    #[test]
    fn test_data_after_remote_fin() {
        let mut stream = SpdyStream::new(2, false, 65536);
        stream.receive_headers(Headers::new(), true).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        assert!(matches!(stream.receive_data(b"x", false), Err(Error::StreamClosed(2))));
    }

    #[test]
    fn test_receive_window_enforced() {
        let mut stream = SpdyStream::new(1, true, 4);
        stream.send_headers(false).unwrap();
        assert!(matches!(stream.receive_data(b"12345", false), Err(Error::FlowControl(_))));
    }

    #[test]
    fn test_reset_fails_pending_send_once() {
        let mut stream = SpdyStream::new(1, true, 65536);
        stream.send_headers(false).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        stream
            .queue_send(PendingSend::new(
                Bytes::from_static(b"payload"),
                true,
                Some(Box::new(move |result: Result<()>| {
                    sink.lock().unwrap().push(result.map_err(|e| e.rst_status()));
                })),
            ))
            .unwrap();

        stream.reset(RstStatus::Cancel);
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(!stream.has_pending());

        stream.reset(RstStatus::Cancel);
        assert_eq!(*seen.lock().unwrap(), vec![Err(RstStatus::Cancel)]);
    }

    #[test]
    fn test_completion_fires_on_close() {
        let mut stream = SpdyStream::new(1, true, 65536);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        stream.set_completion(Box::new(move |result| {
            *sink.lock().unwrap() = Some(result.map(|e| (e.status(), e.body)));
        }));

        stream.send_headers(true).unwrap();
        assert!(!stream.complete());
        stream
            .receive_reply(headers(&[(":status", "200 OK")]), false)
            .unwrap();
        stream.receive_data(b"ok", true).unwrap();

        assert!(stream.complete());
        assert!(!stream.complete());
        let result = seen.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(result, (Some(200), Bytes::from_static(b"ok")));
    }

    #[test]
    fn test_queue_after_fin_rejected() {
        let mut stream = SpdyStream::new(1, true, 65536);
        stream.send_headers(false).unwrap();
        stream.queue_send(PendingSend::new(Bytes::new(), true, None)).unwrap();
        assert!(stream.queue_send(PendingSend::new(Bytes::new(), false, None)).is_err());
    }

    #[test]
    fn test_stream_manager_client() {
        let mut manager = StreamManager::new(true);
        assert_eq!(manager.create_stream(65536).unwrap(), 1);
        assert_eq!(manager.create_stream(65536).unwrap(), 3);
        assert_eq!(manager.create_stream(65536).unwrap(), 5);
        assert_eq!(manager.active_stream_count(), 3);
        assert!(manager.is_local_id(7));
        assert!(!manager.is_local_id(2));
    }

    #[test]
    fn test_stream_manager_server() {
        let mut manager = StreamManager::new(false);
        assert_eq!(manager.peek_next_stream_id(), 2);
        assert_eq!(manager.create_stream(65536).unwrap(), 2);
        assert_eq!(manager.create_stream(65536).unwrap(), 4);
    }

    #[test]
    fn test_stream_manager_peer_limit() {
        let mut manager = StreamManager::new(true);
        manager.set_peer_max_concurrent(Some(2));

        manager.create_stream(65536).unwrap();
        manager.create_stream(65536).unwrap();
        assert!(matches!(manager.create_stream(65536), Err(Error::TooManyStreams)));
    }

    #[test]
    fn test_accept_remote_validation() {
        let mut manager = StreamManager::new(false);
        manager.accept_remote(3, 65536).unwrap();
        assert_eq!(manager.last_peer_id(), 3);

        let status = |r: Result<()>| r.unwrap_err().rst_status();
        assert_eq!(status(manager.accept_remote(3, 65536)), RstStatus::StreamInUse);
        assert_eq!(status(manager.accept_remote(1, 65536)), RstStatus::ProtocolError);
        assert_eq!(status(manager.accept_remote(4, 65536)), RstStatus::ProtocolError);

        manager.set_local_max_concurrent(Some(1));
        assert_eq!(status(manager.accept_remote(5, 65536)), RstStatus::RefusedStream);
        manager.remove_stream(3);
        manager.accept_remote(7, 65536).unwrap();
    }
}
