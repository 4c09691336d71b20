//! Frame type tags.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tag identifying what a [`crate::Frame`] carries.
///
/// Grouped by direction:
/// - handshake: [`ExchangeKeys`](Self::ExchangeKeys)
/// - data: [`EncryptedMessage`](Self::EncryptedMessage)
/// - room requests (client→server): `JoinRoom`, `LeaveRoom`, `CreateRoom`,
///   `DeleteRoom`
/// - room results (server→client): `JoinedRoom`, `LeftRoom`, `CreatedRoom`,
///   `DeletedRoom`, `AvailableRooms`
/// - presence (server→clients): `UserEnteredChat`, `UserLeftChat`,
///   `CurrentUsers`
/// - status (server→one client): `Success`, `Error`
/// - stdio only, never on the wire: `Connect`, `Send`, `Connected`,
///   `Disconnected`, `Reconnecting`, `KeysExchanged`, `Message`
///
/// Anything else decodes to [`Unknown`](Self::Unknown) carrying the raw tag
/// so dispatch can log what it dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// KEM handshake leg: client sends its encapsulation key, server answers
    /// with the KEM ciphertext.
    ExchangeKeys,
    /// AEAD-encrypted chat payload.
    EncryptedMessage,
    /// Request to join the room named in `value`.
    JoinRoom,
    /// Request to leave the current room (back to the lobby).
    LeaveRoom,
    /// Request to create a room named in `value`.
    CreateRoom,
    /// Request to delete the room named in `value` (creator only).
    DeleteRoom,
    /// Join succeeded; `value` is the JSON-serialized room.
    JoinedRoom,
    /// Leave succeeded; the sender is back in the lobby.
    LeftRoom,
    /// Create succeeded; `value` is the JSON-serialized room.
    CreatedRoom,
    /// Delete succeeded.
    DeletedRoom,
    /// `value` is the JSON list of all rooms.
    AvailableRooms,
    /// A user joined the recipient's room.
    UserEnteredChat,
    /// A user left the recipient's room.
    UserLeftChat,
    /// `value` is the JSON list of members in the recipient's room.
    CurrentUsers,
    /// Positive status reply to a room request.
    Success,
    /// Negative status reply; `value` is the reason.
    Error,
    /// TUI→client: dial the server.
    Connect,
    /// TUI→client: `value` is a line the user typed.
    Send,
    /// Client→TUI: the socket is up and identity was assigned.
    Connected,
    /// Client→TUI: the socket dropped.
    Disconnected,
    /// Client→TUI: a reconnect attempt is scheduled.
    Reconnecting,
    /// Client→TUI: the symmetric key is established.
    KeysExchanged,
    /// Client→TUI: a decrypted chat line.
    Message,
    /// Any tag this build does not know. Logged and dropped by dispatch.
    Unknown(String),
}

impl FrameKind {
    /// The snake_case tag as it appears on the wire.
    pub fn as_tag(&self) -> &str {
        match self {
            Self::ExchangeKeys => "exchange_keys",
            Self::EncryptedMessage => "encrypted_message",
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::CreateRoom => "create_room",
            Self::DeleteRoom => "delete_room",
            Self::JoinedRoom => "joined_room",
            Self::LeftRoom => "left_room",
            Self::CreatedRoom => "created_room",
            Self::DeletedRoom => "deleted_room",
            Self::AvailableRooms => "available_rooms",
            Self::UserEnteredChat => "user_entered_chat",
            Self::UserLeftChat => "user_left_chat",
            Self::CurrentUsers => "current_users",
            Self::Success => "success",
            Self::Error => "error",
            Self::Connect => "connect",
            Self::Send => "send",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::KeysExchanged => "keys_exchanged",
            Self::Message => "message",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for FrameKind {
    fn from(tag: &str) -> Self {
        match tag {
            "exchange_keys" => Self::ExchangeKeys,
            "encrypted_message" => Self::EncryptedMessage,
            "join_room" => Self::JoinRoom,
            "leave_room" => Self::LeaveRoom,
            "create_room" => Self::CreateRoom,
            "delete_room" => Self::DeleteRoom,
            "joined_room" => Self::JoinedRoom,
            "left_room" => Self::LeftRoom,
            "created_room" => Self::CreatedRoom,
            "deleted_room" => Self::DeletedRoom,
            "available_rooms" => Self::AvailableRooms,
            "user_entered_chat" => Self::UserEnteredChat,
            "user_left_chat" => Self::UserLeftChat,
            "current_users" => Self::CurrentUsers,
            "success" => Self::Success,
            "error" => Self::Error,
            "connect" => Self::Connect,
            "send" => Self::Send,
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "reconnecting" => Self::Reconnecting,
            "keys_exchanged" => Self::KeysExchanged,
            "message" => Self::Message,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl Serialize for FrameKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for FrameKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from(tag.as_str()))
    }
}
