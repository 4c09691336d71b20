//! Sealwire chat client.
//!
//! The [`Supervisor`] owns the connection lifecycle for one user: dialing,
//! the KEM handshake, encrypt-and-send, reconnecting with exponential
//! backoff, and a dead-letter queue for lines typed while offline. The
//! [`bridge`] module speaks line-delimited JSON with the external TUI process
//! over stdio; everything user-visible flows through a [`UiEmitter`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
mod commands;
mod error;
mod supervisor;

pub use bridge::UiEmitter;
pub use commands::{parse_line, Command, QUIT_COMMANDS};
pub use error::ClientError;
pub use supervisor::{Supervisor, DLQ_DEPTH, MAX_ATTEMPTS};
