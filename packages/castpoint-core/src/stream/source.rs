//! Upstream audio buffers.
//!
//! The server drains compressed audio produced by an upstream stage. It holds
//! at most one buffer at a time between [`BufferSource::acquire`] and
//! [`BufferSource::release`]; ownership travels with the buffer so nothing
//! else can touch it while the server is draining it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A filled buffer of compressed audio with a read cursor.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Bytes,
    filled: usize,
    offset: usize,
}

impl AudioBuffer {
    /// Wraps a fully filled buffer.
    pub fn new(data: Bytes) -> Self {
        let filled = data.len();
        Self {
            data,
            filled,
            offset: 0,
        }
    }

    /// Wraps a buffer of which only the first `filled` bytes are valid.
    pub fn with_fill(data: Bytes, filled: usize) -> Self {
        let filled = filled.min(data.len());
        Self {
            data,
            filled,
            offset: 0,
        }
    }

    /// Valid bytes in the buffer.
    #[inline]
    pub fn fill_len(&self) -> usize {
        self.filled
    }

    /// Bytes already taken by the server.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes not yet taken.
    #[inline]
    pub fn remaining(&self) -> &[u8] {
        self.data.get(self.offset..self.filled).unwrap_or_default()
    }

    /// Marks `n` more bytes as taken (clamped to what remains).
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.filled);
    }

    /// True once every valid byte has been taken.
    #[inline]
    pub fn is_drained(&self) -> bool {
        self.offset >= self.filled
    }
}

/// The upstream collaborator the server pulls audio from.
pub trait BufferSource {
    /// Hands out the next filled buffer, or `None` if nothing is ready.
    fn acquire(&mut self) -> Option<AudioBuffer>;

    /// Returns a buffer the server is done with, drained or not.
    fn release(&mut self, buffer: AudioBuffer);
}

/// Counters kept by a [`BufferPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers queued by producers.
    pub pushed: u64,
    /// Buffers handed back fully drained.
    pub released: u64,
    /// Buffers handed back with undelivered bytes.
    pub discarded: u64,
    /// Buffers dropped because the queue was full.
    pub overflowed: u64,
}

struct PoolInner {
    queue: Mutex<VecDeque<AudioBuffer>>,
    capacity: usize,
    notify: Notify,
    pushed: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    overflowed: AtomicU64,
}

/// Bounded FIFO of audio buffers shared between producers and the server.
///
/// Producers call [`push`](Self::push) from any thread; the server acquires
/// from the front. When the queue is full the oldest buffer is dropped, since
/// a live stream favours fresh audio over complete audio.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool holding at most `capacity` queued buffers (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
                pushed: AtomicU64::new(0),
                released: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                overflowed: AtomicU64::new(0),
            }),
        }
    }

    /// Queues a filled buffer and signals that data is available.
    pub fn push(&self, data: Bytes) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                let dropped = self.inner.overflowed.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    log::warn!(
                        "[Pool] Queue full ({} buffers), dropped oldest (total dropped: {})",
                        self.inner.capacity,
                        dropped
                    );
                }
            }
            queue.push_back(AudioBuffer::new(data));
        }
        self.inner.pushed.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
    }

    /// Waits until a producer has pushed since the last wakeup.
    pub async fn notified(&self) {
        self.inner.notify.notified().await;
    }

    /// Number of queued buffers.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Returns true if no buffer is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pushed: self.inner.pushed.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            overflowed: self.inner.overflowed.load(Ordering::Relaxed),
        }
    }
}

impl BufferSource for BufferPool {
    fn acquire(&mut self) -> Option<AudioBuffer> {
        self.inner.queue.lock().pop_front()
    }

    fn release(&mut self, buffer: AudioBuffer) {
        if buffer.is_drained() {
            self.inner.released.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.discarded.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "[Pool] Discarding buffer with {} undelivered bytes",
                buffer.remaining().len()
            );
        }
    }
}
