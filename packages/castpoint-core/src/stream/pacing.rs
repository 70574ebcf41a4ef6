//! Real-time pacing parameters.
//!
//! A client must never receive audio faster than it plays. After the initial
//! burst, the server sends at most `burst_size` bytes per tick and ticks every
//! `wait_time`, which works out to the stream's frame rate in bytes.

use std::time::Duration;

use super::AudioFormat;
use crate::protocol_constants::{FRAME_DURATION_MS, FRAME_SIZE_FACTOR, MIN_BURST_SIZE};

/// Pacing derived from an [`AudioFormat`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    /// Encoded bytes per MPEG frame.
    pub bytes_per_frame: usize,
    /// Bytes allowed per pacing tick.
    pub burst_size: usize,
    /// Pacing ticks per second.
    pub packets_per_second: f64,
    /// Time between pacing ticks.
    pub wait_time: Duration,
}

impl Pacing {
    /// Computes pacing for the given format.
    ///
    /// `bytes_per_frame = 144 * bitrate / sample_rate + 1`,
    /// `packets_per_second = bytes_per_frame * (1000 / 26) / burst_size`,
    /// `wait_time = 1 / packets_per_second`.
    pub fn for_format(format: &AudioFormat) -> Self {
        // A zero sample rate would divide by zero; treat it as 1 Hz.
        let sample_rate = u64::from(format.sample_rate.max(1));
        let bytes_per_frame = (FRAME_SIZE_FACTOR * u64::from(format.bitrate) / sample_rate + 1) as usize;
        let burst_size = MIN_BURST_SIZE;

        let frames_per_second = 1000.0 / FRAME_DURATION_MS;
        let packets_per_second = bytes_per_frame as f64 * frames_per_second / burst_size as f64;
        let wait_time = Duration::from_secs_f64(1.0 / packets_per_second);

        Self {
            bytes_per_frame,
            burst_size,
            packets_per_second,
            wait_time,
        }
    }

    /// Average paced throughput in bytes per second.
    #[inline]
    pub fn bytes_per_second(&self) -> f64 {
        self.burst_size as f64 * self.packets_per_second
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::for_format(&AudioFormat::default())
    }
}
