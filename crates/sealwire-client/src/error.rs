//! Client error types.

use thiserror::Error;

/// Errors from the client supervisor.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server URL could not be turned into an upgrade request.
    #[error("invalid server url: {0}")]
    Url(String),

    /// Dialing the server failed; the supervisor's backoff takes over.
    #[error("dial failed: {0}")]
    Dial(String),

    /// Socket-level failure after the dial.
    #[error(transparent)]
    Connection(#[from] sealwire_core::ConnectionError),

    /// KEM or AEAD failure.
    #[error(transparent)]
    Crypto(#[from] sealwire_crypto::CryptoError),

    /// Envelope failure.
    #[error(transparent)]
    Proto(#[from] sealwire_proto::ProtoError),
}
