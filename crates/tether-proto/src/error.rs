//! Protocol error types and wire constants.

use thiserror::Error;

/// Protocol version carried by every envelope. There is no negotiation
/// beyond capability intersection; a mismatch is fatal to the session.
pub const PROTOCOL_VERSION: u32 = 1;

/// Hard upper bound on frame size (16 MiB). Configured ceilings may not
/// exceed this limit.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Default frame ceiling (1 MiB) applied when the configuration does not
/// override `limits.max_frame_bytes`.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Errors produced by the envelope codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame length exceeded the configured ceiling. The length is
    /// validated before any allocation occurs.
    #[error("frame of {size} bytes exceeds ceiling of {max} bytes")]
    FrameTooLarge {
        /// Declared or actual frame size in bytes.
        size: usize,
        /// The ceiling in force.
        max: usize,
    },

    /// The frame payload was not a decodable envelope.
    #[error("envelope decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The envelope could not be encoded into the output buffer.
    #[error("envelope encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Envelope advertised an unsupported protocol version.
    #[error("protocol version {got} is not supported (expected {PROTOCOL_VERSION})")]
    VersionMismatch {
        /// The version the peer sent.
        got: u32,
    },

    /// Transport-level I/O failure while framing.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Constructs a [`ProtocolError::FrameTooLarge`].
    #[must_use]
    pub const fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }
}

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
