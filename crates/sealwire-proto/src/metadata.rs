//! Per-frame sender metadata and room summaries.

use serde::{Deserialize, Serialize};

/// Sender identity attached to every frame.
///
/// `user_id` is assigned by the server on connect. `username` and `color` are
/// either assigned by the server or echoed from a client-supplied reconnect
/// hint. `current_room_id` is the authoritative room of the sender at emit
/// time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMetadata {
    /// Opaque server-assigned user identifier.
    pub user_id: String,
    /// Display name, unique among live connections.
    pub username: String,
    /// `#RRGGBB` display color.
    pub color: String,
    /// Room the sender is in when the frame is emitted.
    pub current_room_id: String,
}

impl WsMetadata {
    /// Metadata for server-originated status frames.
    pub fn system(color: &str) -> Self {
        Self {
            user_id: crate::SYSTEM_USER.to_string(),
            username: crate::SYSTEM_USER.to_string(),
            color: color.to_string(),
            current_room_id: String::new(),
        }
    }
}

/// Snapshot of one room, carried in `joined_room`, `created_room`, and
/// `available_rooms` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// Stable opaque room id.
    pub id: String,
    /// Human-chosen room name.
    pub name: String,
    /// User id of the creator (the reserved `system` id for the lobby).
    /// Deliberately not a username: usernames are recycled across
    /// connections, user ids are not.
    pub created_by: String,
    /// Number of connections currently in the room.
    pub member_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_fields_are_camel_case() {
        let metadata = WsMetadata {
            user_id: "u-1".to_string(),
            username: "Swift Lion".to_string(),
            color: "#3CB44B".to_string(),
            current_room_id: "lobby".to_string(),
        };

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["currentRoomId"], "lobby");
        assert_eq!(json["username"], "Swift Lion");
        assert_eq!(json["color"], "#3CB44B");
    }

    #[test]
    fn room_info_round_trips() {
        let info = RoomInfo {
            id: "lobby".to_string(),
            name: "lobby".to_string(),
            created_by: "system".to_string(),
            member_count: 3,
        };

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"createdBy\":\"system\""));
        assert!(json.contains("\"memberCount\":3"));

        let parsed: RoomInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}
