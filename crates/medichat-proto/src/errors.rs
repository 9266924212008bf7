//! Protocol error types.

use thiserror::Error;

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding live channel frames.
///
/// Every variant is local to a single frame. Callers drop the frame and keep
/// the connection; none of these are connection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Frame is not a JSON object with a `type` discriminator.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Discriminator was recognised but the payload did not match it.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Event type from the frame's `type` field.
        kind: String,
        /// Deserializer message.
        reason: String,
    },

    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),
}
