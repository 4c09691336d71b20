//! Connection error types.

use std::time::Duration;

use thiserror::Error;

/// Errors from the connection's read and write paths.
///
/// All of these are fatal for the socket they occurred on. The server reacts
/// by removing the connection and broadcasting the departure; the client
/// reacts by triggering one reconnect signal.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The writer loop has exited; no send can ever succeed again.
    #[error("connection closed")]
    Closed,

    /// No frame (not even a pong) arrived within the deadline. The socket is
    /// treated as dead.
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// The socket did not accept the write within the deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Underlying socket failure.
    #[error("transport error: {0}")]
    Transport(String),
}
