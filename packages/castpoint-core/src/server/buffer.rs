//! Per-listener staging buffer.
//!
//! Audio normally goes straight from the upstream buffer to the socket. When
//! a metadata block must be spliced in, the chunk is assembled here instead so
//! the upstream buffer is never modified. The buffer remembers where the block
//! sits, so a partial write can tell audio bytes from metadata bytes.

use std::ops::Range;

use thiserror::Error;

/// A splice did not fit the staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("staging buffer overflow: need {needed} bytes, capacity {capacity}")]
pub struct BufferOverflow {
    pub needed: usize,
    pub capacity: usize,
}

/// How many consumed bytes were audio and how many were metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Consumed {
    pub audio: usize,
    pub metadata: usize,
}

/// Fixed-capacity staging area for one outgoing chunk.
#[derive(Debug)]
pub struct ListenerBuffer {
    data: Vec<u8>,
    capacity: usize,
    read: usize,
    metadata: Range<usize>,
}

impl ListenerBuffer {
    /// Allocates the buffer once; it never grows past `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            read: 0,
            metadata: 0..0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes staged but not yet written.
    pub fn pending(&self) -> &[u8] {
        self.data.get(self.read..).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.read >= self.data.len()
    }

    /// Stages `audio` with `block` inserted at `offset`.
    ///
    /// Any previously staged bytes are discarded, so callers only splice into
    /// an empty buffer.
    pub fn splice(&mut self, audio: &[u8], offset: usize, block: &[u8]) -> Result<(), BufferOverflow> {
        let needed = audio.len() + block.len();
        if needed > self.capacity {
            return Err(BufferOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        let offset = offset.min(audio.len());

        self.data.clear();
        self.data.extend_from_slice(audio);
        self.data.splice(offset..offset, block.iter().copied());
        self.read = 0;
        self.metadata = offset..offset + block.len();
        Ok(())
    }

    /// Marks `n` pending bytes as written and classifies them.
    pub fn consume(&mut self, n: usize) -> Consumed {
        let end = (self.read + n).min(self.data.len());
        let taken = self.read..end;

        let overlap_start = taken.start.max(self.metadata.start);
        let overlap_end = taken.end.min(self.metadata.end);
        let metadata = overlap_end.saturating_sub(overlap_start);
        let consumed = Consumed {
            audio: (end - self.read) - metadata,
            metadata,
        };

        self.read = end;
        if self.is_empty() {
            self.clear();
        }
        consumed
    }

    /// Drops everything staged.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read = 0;
        self.metadata = 0..0;
    }
}
