//! Pooled work buffers
//!
//! The header compressor works on fixed-size contiguous buffers. Buffers
//! are checked out as [`PooledBuffer`] guards which return themselves to
//! the pool when dropped, so every exit path (errors included) releases
//! them.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

/// Pool of equally sized buffers
#[derive(Debug, Clone)]
pub struct BufferPool {
    buffer_size: usize,
    max_idle: usize,
    state: Arc<Mutex<PoolState>>,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte buffers keeping at most
    /// `max_idle` released buffers around
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        BufferPool {
            buffer_size,
            max_idle,
            state: Arc::new(Mutex::new(PoolState {
                free: Vec::new(),
                outstanding: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // The state is a free list and a counter; both stay valid after a panic
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Check out an empty buffer with `buffer_size` bytes of capacity
    pub fn acquire(&self) -> PooledBuffer {
        let mut state = self.state();
        state.outstanding += 1;
        let buf = state
            .free
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size));
        drop(state);

        PooledBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    /// Buffers currently checked out
    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }

    /// Released buffers waiting for reuse
    pub fn idle(&self) -> usize {
        self.state().free.len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut state = self.state();
        state.outstanding = state.outstanding.saturating_sub(1);
        if buf.capacity() == self.buffer_size && state.free.len() < self.max_idle {
            state.free.push(buf);
        }
    }
}

/// A buffer checked out of a [`BufferPool`]
///
/// Holds at most `buffer_size` bytes; writers check [`remaining`](Self::remaining)
/// before appending.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: BufferPool,
}

impl PooledBuffer {
    /// Free capacity left in the buffer
    pub fn remaining(&self) -> usize {
        self.pool.buffer_size.saturating_sub(self.len())
    }

    pub fn capacity(&self) -> usize {
        self.pool.buffer_size
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Append bytes; callers keep within the fixed capacity
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.remaining());
        self.vec_mut().extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.vec_mut().clear();
    }

    /// Backing vector, for writers that fill spare capacity directly
    pub(crate) fn vec_mut(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let pool = BufferPool::new(128, 4);
        {
            let mut a = pool.acquire();
            let b = pool.acquire();
            assert_eq!(pool.outstanding(), 2);
            a.extend_from_slice(b"abc");
            assert_eq!(&a[..], b"abc");
            assert_eq!(a.remaining(), 125);
            assert!(b.is_empty());
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_reused_buffers_are_cleared() {
        let pool = BufferPool::new(16, 1);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"stale");
        drop(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn test_release_on_error_path() {
        fn fails(pool: &BufferPool) -> Result<(), String> {
            let _buf = pool.acquire();
            Err("boom".to_string())
        }

        let pool = BufferPool::new(32, 2);
        assert!(fails(&pool).is_err());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_idle_limit() {
        let pool = BufferPool::new(8, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
