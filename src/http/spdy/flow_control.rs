//! SPDY flow control
//!
//! Every stream has a send window that starts at the peer's advertised
//! initial window size. spdy/3.1 adds a connection-level send window
//! controlled through WINDOW_UPDATE frames on stream 0; spdy/3 has none.
//!
//! Windows are signed. A SETTINGS frame that lowers the initial window
//! size can push a window below zero when bytes are already in flight; the
//! window then grants nothing until enough WINDOW_UPDATE credit arrives.

use super::error::{Error, Result};
use super::stream::StreamId;
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use std::collections::HashMap;

/// Flow control window
///
/// Tracks the available window size for sending data.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Initial size this window was last reconciled against
    initial_size: u32,
    /// Current window size (can be negative if over-committed)
    current_size: i64,
    max_size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
            max_size: MAX_WINDOW_SIZE as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Check if window has available capacity
    pub fn has_capacity(&self) -> bool {
        self.current_size > 0
    }

    /// Consume window capacity for sending data
    ///
    /// Returns the amount actually granted, which is 0 while the window is
    /// exhausted or negative.
    pub fn consume(&mut self, amount: usize) -> usize {
        if amount == 0 || self.current_size <= 0 {
            return 0;
        }

        let granted = std::cmp::min(amount as i64, self.current_size) as usize;
        self.current_size -= granted as i64;
        granted
    }

    /// Increase window size (WINDOW_UPDATE)
    ///
    /// Returns the new window size
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "Window update delta must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;
        if new_size > self.max_size {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Decrease window size (receiving data)
    pub fn decrease(&mut self, amount: usize) {
        self.current_size -= amount as i64;
    }

    /// Rebase the window on a new initial size
    ///
    /// The difference between the new and the previously applied initial
    /// size is added to the current size, so applying the same value twice
    /// is a no-op.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > self.max_size {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Which window a WINDOW_UPDATE addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowScope {
    Connection,
    Stream(StreamId),
}

impl WindowScope {
    pub fn from_stream_id(stream_id: StreamId) -> Self {
        if stream_id == 0 {
            WindowScope::Connection
        } else {
            WindowScope::Stream(stream_id)
        }
    }
}

/// Send-side window accounting for one connection
///
/// Owned by the connection and only reached through `&mut`, so a grant and
/// the matching decrement of both windows cannot interleave with another
/// sender on the same connection.
#[derive(Debug)]
pub struct FlowLedger {
    /// `None` when the protocol has no connection-level flow control
    connection: Option<FlowControlWindow>,
    /// Peer's current INITIAL_WINDOW_SIZE
    initial_window_size: u32,
    streams: HashMap<StreamId, FlowControlWindow>,
}

impl FlowLedger {
    /// Create a ledger, with a connection window for spdy/3.1
    pub fn new(connection_flow_control: bool) -> Self {
        FlowLedger {
            connection: connection_flow_control.then(FlowControlWindow::new),
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
    }

    /// Connection window size, if the protocol has one
    pub fn connection_window(&self) -> Option<i64> {
        self.connection.as_ref().map(|w| w.size())
    }

    /// Stream window size
    pub fn stream_window(&self, stream_id: StreamId) -> Option<i64> {
        self.streams.get(&stream_id).map(|w| w.size())
    }

    /// Start tracking a stream at the current initial window size
    pub fn open_stream(&mut self, stream_id: StreamId) {
        self.streams
            .insert(stream_id, FlowControlWindow::with_initial_size(self.initial_window_size));
    }

    pub fn close_stream(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Bring a stream's window in line with the current initial size
    pub fn reconcile_initial_window(&mut self, stream_id: StreamId) -> Result<()> {
        let initial = self.initial_window_size;
        match self.streams.get_mut(&stream_id) {
            Some(window) if window.initial_size() != initial => window.update_initial_size(initial),
            Some(_) => Ok(()),
            None => Err(Error::StreamNotFound(stream_id)),
        }
    }

    /// Apply a new peer INITIAL_WINDOW_SIZE to every tracked stream
    ///
    /// Returns the streams whose window would overflow; they are dropped
    /// from the ledger and must be reset by the caller.
    pub fn set_initial_window(&mut self, new_size: u32) -> Vec<StreamId> {
        self.initial_window_size = new_size;
        let mut overflowed = Vec::new();
        for (id, window) in self.streams.iter_mut() {
            if window.update_initial_size(new_size).is_err() {
                overflowed.push(*id);
            }
        }
        for id in &overflowed {
            self.streams.remove(id);
        }
        overflowed.sort_unstable();
        overflowed
    }

    /// Reserve up to `requested` bytes for sending on a stream
    ///
    /// Returns `min(requested, stream window, connection window)` and
    /// decrements both windows by that amount. A return of 0 means the
    /// stream must wait for a window update.
    pub fn grantable(&mut self, stream_id: StreamId, requested: usize) -> Result<usize> {
        self.reconcile_initial_window(stream_id)?;

        let stream_available = self.stream_window(stream_id).unwrap_or(0);
        let connection_available = self.connection_window().unwrap_or(i64::MAX);
        let grant = (requested as i64).min(stream_available).min(connection_available);
        if grant <= 0 {
            return Ok(0);
        }

        let grant = grant as usize;
        if let Some(window) = self.streams.get_mut(&stream_id) {
            window.consume(grant);
        }
        if let Some(window) = self.connection.as_mut() {
            window.consume(grant);
        }
        Ok(grant)
    }

    /// Credit a window from a WINDOW_UPDATE
    ///
    /// Returns true when the window went from exhausted to positive, i.e.
    /// suspended streams should be resumed. Updates for streams no longer
    /// tracked and connection updates without a connection window are
    /// ignored.
    pub fn apply_window_update(&mut self, scope: WindowScope, delta: u32) -> Result<bool> {
        let window = match scope {
            WindowScope::Connection => self.connection.as_mut(),
            WindowScope::Stream(id) => self.streams.get_mut(&id),
        };
        let window = match window {
            Some(window) => window,
            None => {
                if delta == 0 {
                    return Err(Error::Protocol(
                        "Window update delta must be non-zero".to_string(),
                    ));
                }
                return Ok(false);
            }
        };

        let was_exhausted = !window.has_capacity();
        window.increase(delta)?;
        Ok(was_exhausted && window.has_capacity())
    }
}

/// Receive-side window for a stream or the connection
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    window: FlowControlWindow,
}

impl ReceiveWindow {
    pub fn new(initial_size: u32) -> Self {
        ReceiveWindow {
            window: FlowControlWindow::with_initial_size(initial_size),
        }
    }

    pub fn size(&self) -> i64 {
        self.window.size()
    }

    /// Account for inbound DATA
    ///
    /// Data beyond the advertised window is a flow control violation.
    pub fn consume(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.window.size() {
            return Err(Error::FlowControl(format!(
                "{} bytes received with {} left in window",
                amount,
                self.window.size()
            )));
        }
        self.window.decrease(amount);
        Ok(())
    }

    /// Check if we need to send WINDOW_UPDATE
    ///
    /// Returns the increment that restores the initial size once the window
    /// has fallen below half of it.
    pub fn should_send_window_update(&self) -> Option<u32> {
        let recv_size = self.window.size();
        let initial_size = self.window.initial_size() as i64;

        if recv_size < initial_size / 2 {
            Some((initial_size - recv_size) as u32)
        } else {
            None
        }
    }

    /// Record a WINDOW_UPDATE we sent
    pub fn acknowledge(&mut self, increment: u32) -> Result<i64> {
        self.window.increase(increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_control_window_consume() {
        let mut window = FlowControlWindow::with_initial_size(100);
        assert_eq!(window.consume(50), 50);
        assert_eq!(window.size(), 50);
        assert_eq!(window.consume(60), 50);
        assert_eq!(window.size(), 0);
        assert_eq!(window.consume(10), 0);
    }

    #[test]
    fn test_flow_control_window_overflow() {
        let mut window = FlowControlWindow::with_initial_size(0x7FFFFFFF);
        assert!(matches!(window.increase(1), Err(Error::FlowControl(_))));
        assert!(matches!(window.increase(0), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_flow_control_window_update_initial_size() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);

        window.update_initial_size(200).unwrap();
        assert_eq!(window.size(), 150);

        // Re-applying the same baseline does not double count
        window.update_initial_size(200).unwrap();
        assert_eq!(window.size(), 150);

        window.update_initial_size(10).unwrap();
        assert_eq!(window.size(), -40);
    }

    #[test]
    fn test_grantable_takes_minimum() {
        let mut ledger = FlowLedger::new(true);
        ledger.open_stream(1);
        ledger.apply_window_update(WindowScope::Stream(1), 1000).unwrap();

        assert_eq!(ledger.grantable(1, 100).unwrap(), 100);
        assert_eq!(ledger.stream_window(1), Some(66436));
        assert_eq!(ledger.connection_window(), Some(65436));

        // Connection window is now the limit
        assert_eq!(ledger.grantable(1, 100_000).unwrap(), 65436);
        assert_eq!(ledger.connection_window(), Some(0));
        assert_eq!(ledger.grantable(1, 1).unwrap(), 0);
    }

    #[test]
    fn test_spdy3_has_no_connection_window() {
        let mut ledger = FlowLedger::new(false);
        ledger.open_stream(1);
        ledger.open_stream(3);
        assert_eq!(ledger.grantable(1, 100_000).unwrap(), 65536);
        assert_eq!(ledger.grantable(3, 100_000).unwrap(), 65536);
        assert!(!ledger.apply_window_update(WindowScope::Connection, 10).unwrap());
    }

    #[test]
    fn test_window_update_resumes() {
        let mut ledger = FlowLedger::new(false);
        ledger.open_stream(1);
        ledger.grantable(1, 65536).unwrap();

        assert!(ledger.apply_window_update(WindowScope::Stream(1), 10).unwrap());
        assert!(!ledger.apply_window_update(WindowScope::Stream(1), 10).unwrap());
        assert!(!ledger.apply_window_update(WindowScope::Stream(99), 10).unwrap());
    }

    #[test]
    fn test_negative_window_recovers() {
        let mut ledger = FlowLedger::new(false);
        ledger.open_stream(1);
        assert_eq!(ledger.grantable(1, 60_000).unwrap(), 60_000);

        assert!(ledger.set_initial_window(1000).is_empty());
        assert_eq!(ledger.stream_window(1), Some(1000 - 60_000));
        assert_eq!(ledger.grantable(1, 10).unwrap(), 0);

        // Still negative after a small update: no resume, no grant
        assert!(!ledger.apply_window_update(WindowScope::Stream(1), 50_000).unwrap());
        assert_eq!(ledger.grantable(1, 10).unwrap(), 0);

        assert!(ledger.apply_window_update(WindowScope::Stream(1), 10_000).unwrap());
        assert_eq!(ledger.grantable(1, 5000).unwrap(), 1000);
    }

    #[test]
    fn test_initial_window_overflow_reported() {
        let mut ledger = FlowLedger::new(false);
        ledger.open_stream(1);
        ledger.open_stream(3);
        ledger
            .apply_window_update(WindowScope::Stream(3), MAX_WINDOW_SIZE - 65536)
            .unwrap();

        assert_eq!(ledger.set_initial_window(70_000), vec![3]);
        assert!(!ledger.contains(3));
        assert_eq!(ledger.stream_window(1), Some(70_000));
    }

    #[test]
    fn test_streams_opened_after_settings_use_new_size() {
        let mut ledger = FlowLedger::new(false);
        ledger.set_initial_window(500);
        ledger.open_stream(5);
        assert_eq!(ledger.grantable(5, 1000).unwrap(), 500);
    }

    #[test]
    fn test_sent_bytes_bounded_by_credit() {
        // Deterministic pseudo-random interleaving of grants, updates and
        // settings changes
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        let mut ledger = FlowLedger::new(true);
        let streams = [1u32, 3, 5];
        let mut sent = [0i64; 3];
        let mut credit = [DEFAULT_INITIAL_WINDOW_SIZE as i64; 3];
        let mut connection_credit = DEFAULT_INITIAL_WINDOW_SIZE as i64;
        let mut connection_sent = 0i64;
        let mut initial = DEFAULT_INITIAL_WINDOW_SIZE as i64;
        for id in streams {
            ledger.open_stream(id);
        }

        for _ in 0..5000 {
            let i = (next() % 3) as usize;
            match next() % 4 {
                0 | 1 => {
                    let granted = ledger.grantable(streams[i], (next() % 20_000) as usize).unwrap();
                    sent[i] += granted as i64;
                    connection_sent += granted as i64;
                }
                2 => {
                    let delta = (next() % 30_000 + 1) as u32;
                    if next() % 2 == 0 {
                        if ledger.apply_window_update(WindowScope::Stream(streams[i]), delta).is_ok() {
                            credit[i] += delta as i64;
                        }
                    } else if ledger.apply_window_update(WindowScope::Connection, delta).is_ok() {
                        connection_credit += delta as i64;
                    }
                }
                _ => {
                    let new_initial = (next() % 100_000 + 1) as i64;
                    assert!(ledger.set_initial_window(new_initial as u32).is_empty());
                    for c in credit.iter_mut() {
                        *c += new_initial - initial;
                    }
                    initial = new_initial;
                }
            }

            for k in 0..3 {
                assert!(sent[k] <= credit[k], "stream {} overspent", streams[k]);
            }
            assert!(connection_sent <= connection_credit);
        }
    }

    #[test]
    fn test_receive_window() {
        let mut window = ReceiveWindow::new(100);
        assert_eq!(window.should_send_window_update(), None);

        window.consume(60).unwrap();
        assert_eq!(window.should_send_window_update(), Some(60));
        window.acknowledge(60).unwrap();
        assert_eq!(window.size(), 100);

        assert!(matches!(window.consume(101), Err(Error::FlowControl(_))));
    }
}
