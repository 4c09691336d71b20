//! Server error types.

use thiserror::Error;

/// Errors from the server runtime.
///
/// Room-level failures (`room not found`, `permission denied`, `not empty`)
/// are NOT here: they are [`crate::RegistryError`], reported to the requester
/// as an `error` frame while the server keeps running.
#[derive(Debug, Error)]
pub enum HubError {
    /// The listener could not be bound.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// Local address lookup failed.
    #[error("local address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),
}
