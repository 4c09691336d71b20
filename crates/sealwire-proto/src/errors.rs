//! Protocol error types.

use thiserror::Error;

/// Errors from envelope encoding and decoding.
///
/// An unknown `type` tag is deliberately NOT represented here; it decodes to
/// [`crate::FrameKind::Unknown`] and is handled at dispatch. Invalid base64
/// in `value`/`nonce` surfaces as [`Decode`](Self::Decode).
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Malformed JSON or a field with the wrong shape.
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Envelope could not be serialized.
    #[error("frame encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}
