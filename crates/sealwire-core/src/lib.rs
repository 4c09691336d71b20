//! Connection core shared by the sealwire client and server.
//!
//! One [`Connection`] owns one WebSocket. Its write side is touched by
//! exactly one task (the writer loop draining a bounded queue), its read side
//! by exactly one caller at a time. Lifecycle is tracked by four one-shot
//! [`Latch`]es: `writer_ready`, `writer_closed`, `keys_exchanged`, and the
//! cancellation token that stands in for `ctx_done`.
//!
//! # Lifecycle
//!
//! ```text
//! created ──> writer_ready ──> handshake in flight ──> keys_exchanged
//!                 (active) ──> terminal (socket error / cancel / quit)
//!                          ──> writer_closed
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod latch;

pub use connection::{
    Connection, WriteKind, PING_PERIOD, PONG_WAIT, WRITE_QUEUE_DEPTH, WRITE_WAIT,
};
pub use error::ConnectionError;
pub use latch::Latch;
