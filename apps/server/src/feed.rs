//! Real-time file feed.
//!
//! Stands in for a live encoder: an MP3 file is cut into fixed-size chunks
//! and pushed into the server's buffer pool at the stream bitrate, starting
//! over at the end of the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use castpoint_core::{AudioFormat, BufferPool};
use tokio::time::MissedTickBehavior;

/// Loops over a file in fixed-size chunks.
pub struct FileFeed {
    data: Bytes,
    chunk_size: usize,
    offset: usize,
    period: Duration,
}

impl FileFeed {
    /// Reads the whole file.
    pub fn load(path: &Path, chunk_size: usize, format: &AudioFormat) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        Self::from_bytes(Bytes::from(data), chunk_size, format)
            .with_context(|| format!("Unusable input file: {}", path.display()))
    }

    pub fn from_bytes(data: Bytes, chunk_size: usize, format: &AudioFormat) -> Result<Self> {
        if data.is_empty() {
            bail!("input is empty");
        }
        if format.bitrate == 0 {
            bail!("bitrate must be non-zero");
        }
        let chunk_size = chunk_size.max(1);
        Ok(Self {
            data,
            chunk_size,
            offset: 0,
            period: chunk_period(chunk_size, format),
        })
    }

    /// Time one chunk takes to play.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Next chunk, wrapping to the start after the last one.
    ///
    /// The last chunk of the file may be short.
    pub fn next_chunk(&mut self) -> Bytes {
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = if end >= self.data.len() {
            log::debug!("[Feed] End of input, looping");
            0
        } else {
            end
        };
        chunk
    }

    /// Pushes chunks into `pool` at playback rate, forever.
    pub async fn run(mut self, pool: BufferPool) {
        log::info!(
            "[Feed] Feeding {} bytes in {} byte chunks every {:?}",
            self.data.len(),
            self.chunk_size,
            self.period
        );

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            pool.push(self.next_chunk());
        }
    }
}

/// Playback time of `chunk_size` bytes at the format's bitrate.
fn chunk_period(chunk_size: usize, format: &AudioFormat) -> Duration {
    let bytes_per_second = (f64::from(format.bitrate) / 8.0).max(1.0);
    Duration::from_secs_f64(chunk_size as f64 / bytes_per_second)
}
