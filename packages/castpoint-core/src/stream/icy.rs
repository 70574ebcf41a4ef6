//! ICY (Shoutcast) protocol metadata handling.
//!
//! This module holds the stateless half of inline metadata: formatting the
//! stream title into an ICY block, and deciding where a block must be spliced
//! into the outgoing byte stream. The splice itself happens in the listener's
//! staging buffer.

use crate::protocol_constants::{
    MAX_STREAM_TITLE_LEN, METADATA_UNIT, STREAM_TITLE_PREFIX, STREAM_TITLE_SUFFIX,
};

/// Formats stream titles into ICY protocol blocks.
pub struct IcyFormatter;

impl IcyFormatter {
    /// Normalizes a title for embedding in `StreamTitle='...';`.
    ///
    /// ICY metadata uses single quotes as delimiters. Instead of backslash
    /// escaping (which many players display literally), ASCII apostrophes are
    /// replaced with U+2019, which looks identical. The result is truncated on
    /// a character boundary to [`MAX_STREAM_TITLE_LEN`] bytes.
    #[must_use]
    pub fn sanitize_title(title: &str) -> String {
        let mut title: String = title
            .chars()
            .filter(|c| !c.is_control())
            .map(|c| if c == '\'' { '\u{2019}' } else { c })
            .collect();

        if title.len() > MAX_STREAM_TITLE_LEN {
            let mut cut = MAX_STREAM_TITLE_LEN;
            while !title.is_char_boundary(cut) {
                cut -= 1;
            }
            log::debug!(
                "[ICY] Truncating stream title from {} to {} bytes",
                title.len(),
                cut
            );
            title.truncate(cut);
        }
        title
    }

    /// Formats a title into an ICY metadata block.
    ///
    /// The first byte is the number of 16-byte units that follow; the payload
    /// is `StreamTitle='<title>';` padded with NUL to that size. An empty
    /// title yields a single zero byte ("no update").
    ///
    /// The title is expected to be sanitized already.
    #[must_use]
    pub fn format_title(title: &str) -> Vec<u8> {
        if title.is_empty() {
            return vec![0];
        }

        log::trace!("[ICY] StreamTitle='{}'", title);

        let payload_len = STREAM_TITLE_PREFIX.len() + title.len() + STREAM_TITLE_SUFFIX.len();
        let units = payload_len.div_ceil(METADATA_UNIT).min(u8::MAX as usize);
        let padded_len = units * METADATA_UNIT;

        let mut block = Vec::with_capacity(padded_len + 1);
        block.push(units as u8);
        block.extend_from_slice(STREAM_TITLE_PREFIX.as_bytes());
        block.extend_from_slice(title.as_bytes());
        block.extend_from_slice(STREAM_TITLE_SUFFIX.as_bytes());
        block.resize(padded_len + 1, 0);
        block
    }
}

/// Returns true if the next metadata boundary falls within the coming burst.
///
/// `(bytes_sent_total + burst_size) mod period <= burst_size`
#[inline]
pub fn is_due(bytes_sent_total: u64, burst_size: usize, period: usize) -> bool {
    if period == 0 {
        return false;
    }
    (bytes_sent_total + burst_size as u64) % period as u64 <= burst_size as u64
}

/// Distance from the current send position to the next metadata boundary.
///
/// Always in `1..=period`: a block sits after every `period` audio bytes, so a
/// position exactly on a boundary has already had its block.
#[inline]
pub fn metadata_offset(bytes_sent_total: u64, period: usize) -> usize {
    if period == 0 {
        return 0;
    }
    period - (bytes_sent_total % period as u64) as usize
}

/// Inputs to the splice decision for one outgoing chunk.
#[derive(Debug, Clone, Copy)]
pub struct SpliceRequest {
    /// Audio bytes delivered so far on this connection.
    pub bytes_sent_total: u64,
    /// Audio bytes about to be sent.
    pub len: usize,
    /// Pacing burst size.
    pub burst_size: usize,
    /// Audio bytes between metadata blocks (0 = disabled).
    pub metadata_period: usize,
    /// Whether the client asked for `Icy-MetaData: 1`.
    pub wants_metadata: bool,
}

/// Where to splice a metadata block into an outgoing chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplicePlan {
    /// Audio bytes preceding the block.
    pub offset: usize,
    /// Audio bytes to take for this chunk (at least `offset`).
    ///
    /// Capped so no second boundary falls inside the chunk.
    pub audio_len: usize,
}

/// Decides whether a metadata block goes into the next `len` audio bytes.
///
/// Returns `None` when there is nothing to send, metadata is off for this
/// client or mountpoint, or the next boundary lies beyond the chunk. In the
/// last case the block is deferred to a later chunk; audio is never cut short
/// to make room for metadata.
pub fn plan_splice(req: SpliceRequest) -> Option<SplicePlan> {
    if req.len == 0 || !req.wants_metadata || req.metadata_period == 0 {
        return None;
    }

    // The due check is only sound for windows no larger than the burst.
    if !is_due(
        req.bytes_sent_total,
        req.burst_size.max(req.len),
        req.metadata_period,
    ) {
        return None;
    }

    let offset = metadata_offset(req.bytes_sent_total, req.metadata_period);
    if offset > req.len {
        return None;
    }

    let audio_len = req.len.min(offset + req.metadata_period - 1);
    Some(SplicePlan { offset, audio_len })
}
