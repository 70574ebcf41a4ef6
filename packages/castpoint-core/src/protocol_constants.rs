//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the ICY/Icecast conventions and MPEG audio
//! framing. Changing them would break compatibility with legacy streaming
//! clients.

// ─────────────────────────────────────────────────────────────────────────────
// Pacing
// ─────────────────────────────────────────────────────────────────────────────

/// Bytes sent per pacing tick once the initial burst is spent.
///
/// Deliberately small and independent of bitrate to keep client latency low.
pub const MIN_BURST_SIZE: usize = 1400;

/// Duration of one MPEG audio frame (ms), used to derive frames per second.
pub const FRAME_DURATION_MS: f64 = 26.0;

/// MPEG layer III frame size factor: `bytes_per_frame = 144 * bitrate / sample_rate + 1`.
pub const FRAME_SIZE_FACTOR: u64 = 144;

/// Share (percent) of the initial burst granted again when the stream title changes.
pub const TITLE_CHANGE_BURST_PERCENT: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata payloads are sized in units of this many bytes.
pub const METADATA_UNIT: usize = 16;

/// Largest metadata payload expressible by the one-byte length prefix.
pub const MAX_METADATA_LEN: usize = u8::MAX as usize * METADATA_UNIT;

/// Largest encoded metadata block: length byte plus payload.
pub const MAX_METADATA_BLOCK_LEN: usize = MAX_METADATA_LEN + 1;

/// Opening of the ICY stream title field.
pub const STREAM_TITLE_PREFIX: &str = "StreamTitle='";

/// Closing of the ICY stream title field.
pub const STREAM_TITLE_SUFFIX: &str = "';";

/// Longest stream title (bytes) that still fits one metadata block.
pub const MAX_STREAM_TITLE_LEN: usize =
    MAX_METADATA_LEN - STREAM_TITLE_PREFIX.len() - STREAM_TITLE_SUFFIX.len();

/// Default metadata interval advertised as `icy-metaint` (bytes).
pub const DEFAULT_METADATA_PERIOD: usize = 16000;

/// Default allowance sent unpaced right after connect (bytes).
pub const DEFAULT_INITIAL_BURST_SIZE: usize = 65536;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Largest request header block accepted from a client (bytes).
pub const MAX_REQUEST_SIZE: usize = 8 * 1024;

/// Read chunk used while waiting for the request.
pub const REQUEST_READ_CHUNK: usize = 2048;

/// Pending connection queue length for the listening socket.
pub const LISTEN_BACKLOG: i32 = 128;

/// Content type of the served elementary stream.
pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in log lines and default station strings.
pub const APP_NAME: &str = "Castpoint";

/// Value of the `Server` response header.
pub const SERVER_ID: &str = concat!("castpoint/", env!("CARGO_PKG_VERSION"));
