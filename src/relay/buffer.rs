//! Shared pool of relay buffers
//!
//! Each relay direction rents one fixed-size buffer for its whole lifetime
//! and gives it back when the direction ends.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Box<[u8]>>>,
}

/// Pool of equally sized byte buffers, cheap to clone
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool handing out `buffer_size` byte buffers and keeping at
    /// most `max_idle` of them around between rentals
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        BufferPool {
            inner: Arc::new(PoolInner {
                buffer_size,
                max_idle,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Size of every buffer handed out by this pool
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of buffers currently parked in the pool
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Take a buffer from the pool, allocating one if none is idle
    pub fn rent(&self) -> RentedBuffer {
        let reused = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let buf = reused.unwrap_or_else(|| vec![0u8; self.inner.buffer_size].into_boxed_slice());

        RentedBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    fn give_back(&self, buf: Box<[u8]>) {
        let mut idle = self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.inner.max_idle {
            idle.push(buf);
        }
    }
}

/// RAII guard that returns the buffer to its pool on drop
#[derive(Debug)]
pub struct RentedBuffer {
    buf: Option<Box<[u8]>>,
    pool: BufferPool,
}

impl Deref for RentedBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for RentedBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for RentedBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}
