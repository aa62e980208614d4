//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS connections.
//!
//! [`PushbackSession`] sits in front of any session and replays bytes that
//! were consumed speculatively, so a fallback consumer sees the connection
//! from its very first byte.

use super::{Error, Result};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush buffered output, if the session buffers any
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// HTTP session wrapping a transport with session operations
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
}

impl<S: SessionOps> HttpSession<S> {
    /// Create a new HTTP session with the default 10 second timeout
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read data with timeout
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Poll first
        if !self.session.poll(PollEvents::Read, self.timeout)? {
            return Err(Error::Timeout);
        }

        self.session.read(buf)
    }

    /// Write data with timeout
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // Poll first
        if !self.session.poll(PollEvents::Write, self.timeout)? {
            return Err(Error::Timeout);
        }

        self.session.write(buf)
    }

    /// Write the whole buffer, polling between partial writes
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.is_would_block() => continue,
                Err(e) => return Err(e),
            }
        }
        self.session.flush()
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Unwrap the underlying session
    pub fn into_inner(self) -> S {
        self.session
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.session
    }

    /// Get a mutable reference to the underlying session
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

/// Convert a poll timeout to the milliseconds `poll(2)` takes
///
/// `None` waits forever (-1); durations past `i32::MAX` ms are clamped.
pub(crate) fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        None => -1,
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
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
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Ok(result > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        match self.stream.shutdown(Shutdown::Both) {
            // Peer already went away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Error::from),
        }
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}

/// Session that serves pushed-back bytes before reading the transport
///
/// Each pushed-back byte is handed out exactly once and in its original
/// order; only after the buffer drains does `read` reach the inner session.
pub struct PushbackSession<S: SessionOps> {
    inner: S,
    pushed: BytesMut,
}

impl<S: SessionOps> PushbackSession<S> {
    /// Wrap `inner`, replaying `pushed` as the first bytes read
    pub fn new(inner: S, pushed: impl Into<BytesMut>) -> Self {
        PushbackSession {
            inner,
            pushed: pushed.into(),
        }
    }

    /// Put more bytes in front of whatever is still pending
    pub fn unread(&mut self, bytes: &[u8]) {
        let mut front = BytesMut::with_capacity(bytes.len() + self.pushed.len());
        front.extend_from_slice(bytes);
        front.extend_from_slice(&self.pushed);
        self.pushed = front;
    }

    /// Number of pushed-back bytes not yet read
    pub fn pending(&self) -> usize {
        self.pushed.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Split into the inner session and the bytes not yet read
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.inner, self.pushed)
    }
}

impl<S: SessionOps> SessionOps for PushbackSession<S> {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        if !self.pushed.is_empty() && events != PollEvents::Write {
            return Ok(true);
        }
        self.inner.poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pushed.is_empty() {
            return self.inner.read(buf);
        }
        let n = buf.len().min(self.pushed.len());
        buf[..n].copy_from_slice(&self.pushed[..n]);
        self.pushed.advance(n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_poll_timeout_ms() {
        assert_eq!(poll_timeout_ms(None), -1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_millis(1500))), 1500);
        assert_eq!(poll_timeout_ms(Some(Duration::from_secs(30 * 24 * 3600))), i32::MAX);
        assert_eq!(poll_timeout_ms(Some(Duration::MAX)), i32::MAX);
    }

    #[test]
    fn test_fd_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = FdSessionOps::new(stream);

        // Poll for read
        assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(1))).unwrap());

        // Read data
        let mut buf = [0u8; 5];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_http_session_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Don't send anything - test timeout
        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            // Don't send anything
            thread::sleep(Duration::from_secs(2));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = from_tcp_stream(stream);
        session.set_timeout(Some(Duration::from_millis(100)));

        let mut buf = [0u8; 10];
        let result = session.read(&mut buf);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    struct Scripted {
        data: Vec<u8>,
    }

    impl SessionOps for Scripted {
        fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
            Ok(!self.data.is_empty())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_pushback_replays_before_inner() {
        let inner = Scripted {
            data: b" /index HTTP/1.1".to_vec(),
        };
        let mut session = PushbackSession::new(inner, &b"GET"[..]);
        assert!(session.poll(PollEvents::Read, None).unwrap());

        let mut out = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = session.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"GET /index HTTP/1.1");
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn test_pushback_unread_prepends() {
        let inner = Scripted { data: Vec::new() };
        let mut session = PushbackSession::new(inner, &b"cd"[..]);
        session.unread(b"ab");

        let mut buf = [0u8; 8];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert!(!session.poll(PollEvents::Read, None).unwrap());
    }
}
