//! Length-prefixed envelope codec.
//!
//! This module implements a [`tokio_util::codec`] compatible codec for the
//! bridge wire format. Each frame consists of:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Envelope bytes   |
//! +----------------------------+------------------+
//! ```
//!
//! The codec enforces bounded reads: the frame length is validated against
//! the configured ceiling BEFORE allocation, so a hostile length prefix
//! cannot drive memory exhaustion. Decoded frames are parsed into
//! [`Envelope`] directly; protocol-version and sequence checks are the
//! session layer's responsibility.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::error::{DEFAULT_MAX_FRAME_BYTES, MAX_FRAME_BYTES, ProtocolError, ProtocolResult};

/// Length of the frame header (4 bytes for a u32 length prefix).
const HEADER_LEN: usize = 4;

/// Envelope codec for use with [`tokio_util::codec::Framed`].
///
/// An oversized frame is reported as an error once, then skipped: the
/// decoder discards exactly the declared payload length and resumes at
/// the next frame boundary, so the error preserves the session instead
/// of desynchronizing the stream.
///
/// # Invariants
///
/// - Frames never exceed the configured ceiling, in either direction.
/// - The length prefix is always 4 bytes, big-endian.
/// - The ceiling never exceeds [`MAX_FRAME_BYTES`].
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    /// Maximum allowed frame size in bytes.
    max_frame_bytes: usize,
    /// Bytes of a rejected oversized frame still to be discarded.
    skip_remaining: usize,
}

impl EnvelopeCodec {
    /// Creates a codec with the default 1 MiB ceiling.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            skip_remaining: 0,
        }
    }

    /// Creates a codec with a custom ceiling.
    ///
    /// # Panics
    ///
    /// Panics if `max_frame_bytes` exceeds [`MAX_FRAME_BYTES`]. Ceilings
    /// come from validated configuration, so this is a programmer error.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        assert!(
            max_frame_bytes <= MAX_FRAME_BYTES,
            "frame ceiling {max_frame_bytes} exceeds protocol limit {MAX_FRAME_BYTES}"
        );
        Self {
            max_frame_bytes,
            skip_remaining: 0,
        }
    }

    /// Returns the ceiling in force.
    #[must_use]
    pub const fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    fn discard_skipped(&mut self, src: &mut BytesMut) {
        let n = self.skip_remaining.min(src.len());
        src.advance(n);
        self.skip_remaining -= n;
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Envelope>> {
        if self.skip_remaining > 0 {
            self.discard_skipped(src);
            if self.skip_remaining > 0 {
                return Ok(None);
            }
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Length is validated before any allocation.
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_bytes {
            src.advance(HEADER_LEN);
            self.skip_remaining = length;
            self.discard_skipped(src);
            return Err(ProtocolError::frame_too_large(length, self.max_frame_bytes));
        }

        let total_len = HEADER_LEN + length;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload: Bytes = src.split_to(length).freeze();
        let envelope = Envelope::decode(payload)?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> ProtocolResult<()> {
        let length = item.encoded_len();
        if length > self.max_frame_bytes {
            return Err(ProtocolError::frame_too_large(length, self.max_frame_bytes));
        }

        dst.reserve(HEADER_LEN + length);
        #[allow(clippy::cast_possible_truncation)] // validated against the ceiling above
        dst.put_u32(length as u32);
        item.encode(dst)?;
        Ok(())
    }
}
