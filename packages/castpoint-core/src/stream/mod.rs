pub mod icy;
pub mod pacing;
pub mod source;

pub use icy::{plan_splice, IcyFormatter, SplicePlan, SpliceRequest};
pub use pacing::Pacing;
pub use source::{AudioBuffer, BufferPool, BufferSource};

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{APP_NAME, DEFAULT_INITIAL_BURST_SIZE, DEFAULT_METADATA_PERIOD};

/// Encoding of the compressed elementary stream being served.
///
/// Used for:
/// - pacing (bytes per frame, ticks per second)
/// - the `icy-br` and `ice-audio-info` response headers
///
/// Values arrive already validated by the embedding component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Bits per second (e.g. 128000).
    pub bitrate: u32,
    pub channels: u16,
    /// Samples per second (e.g. 44100).
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Creates a new audio format description.
    pub fn new(bitrate: u32, channels: u16, sample_rate: u32) -> Self {
        Self {
            bitrate,
            channels,
            sample_rate,
        }
    }

    /// Bitrate in kbit/s, as advertised by `icy-br`.
    #[inline]
    pub const fn kbps(&self) -> u32 {
        self.bitrate / 1000
    }

    /// Bytes per second of the encoded stream.
    #[inline]
    pub const fn bytes_per_second(&self) -> u64 {
        self.bitrate as u64 / 8
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            bitrate: 128_000,
            channels: 2,
            sample_rate: 44_100,
        }
    }
}

/// Settings of the single served mountpoint.
///
/// Immutable for the duration of a streaming session; the embedding
/// component replaces it wholesale between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountpointSettings {
    /// Mount name (informational; clients always request `/`).
    pub name: String,
    pub station_name: String,
    pub station_description: String,
    pub station_genre: String,
    pub station_url: String,
    /// Audio bytes between inline metadata blocks (0 disables metadata).
    pub metadata_period: usize,
    /// Bytes sent unpaced right after connect.
    pub initial_burst_size: usize,
    /// Listener limit; the server keeps at most one active listener.
    pub max_clients: usize,
}

impl Default for MountpointSettings {
    fn default() -> Self {
        Self {
            name: "/".to_string(),
            station_name: APP_NAME.to_string(),
            station_description: String::new(),
            station_genre: String::new(),
            station_url: String::new(),
            metadata_period: DEFAULT_METADATA_PERIOD,
            initial_burst_size: DEFAULT_INITIAL_BURST_SIZE,
            max_clients: 1,
        }
    }
}
