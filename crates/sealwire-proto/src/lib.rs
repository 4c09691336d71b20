//! Sealwire wire protocol.
//!
//! Every WebSocket text frame exchanged between client and server is exactly
//! one JSON [`Frame`]: a type tag, an opaque byte payload (base64 in JSON),
//! an optional AEAD nonce, and the sender's [`WsMetadata`].
//!
//! The same envelope doubles as the client↔TUI stdio protocol; tags that only
//! ever travel over stdio are marked on [`FrameKind`].
//!
//! Unknown tags are NOT a decode error. Both peers must tolerate frames from
//! newer counterparts, so an unrecognized tag decodes to
//! [`FrameKind::Unknown`] and is dropped at dispatch, not at parse time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;
mod kind;
mod metadata;

pub use errors::ProtoError;
pub use frame::Frame;
pub use kind::FrameKind;
pub use metadata::{RoomInfo, WsMetadata};

/// The well-known room every client lands in. Always exists, never deletable.
pub const LOBBY_ROOM: &str = "lobby";

/// Reserved identity (both username and user id) that owns the lobby and
/// authors server status messages. Never assigned to a connection.
pub const SYSTEM_USER: &str = "system";
