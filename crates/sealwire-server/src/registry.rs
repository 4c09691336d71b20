//! Room and connection registry.
//!
//! Three flat maps keyed by stable opaque ids: rooms by room id, connections
//! by user id, plus the set of usernames in use. Rooms store member user ids,
//! never connection pointers; resolution always goes back through the
//! registry. The caller serializes access through one read/write mutex, so
//! every method here is plain synchronous code.
//!
//! Invariants upheld:
//! - the lobby always exists and is owned by `system`
//! - a connection appears in at most one room's member set
//! - a member's `current_room_id` metadata equals the room holding it
//! - `used_usernames` tracks exactly the live connections plus reserved names

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::SystemTime,
};

use sealwire_core::Connection;
use sealwire_proto::{RoomInfo, LOBBY_ROOM, SYSTEM_USER};
use thiserror::Error;
use uuid::Uuid;

/// One named group of connections.
#[derive(Debug)]
pub struct Room {
    /// Unique, immutable room id (`lobby` or a UUID v4).
    pub id: String,
    /// Human-chosen name. Not necessarily unique.
    pub name: String,
    /// User id of the creator; the reserved `system` id for the lobby.
    /// Usernames are recycled when a connection dies, user ids never are,
    /// so authorization keys off this field only.
    pub created_by: String,
    /// Creation wall-clock time.
    pub created_at: SystemTime,
    /// User ids of current members.
    pub members: HashSet<String>,
}

impl Room {
    /// Wire summary of this room.
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            created_by: self.created_by.clone(),
            member_count: self.members.len(),
        }
    }
}

/// Room-level failures, reported to the requester as `error` frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No room with that name exists.
    #[error("room '{0}' not found")]
    RoomNotFound(String),

    /// Only the room's creator may delete it.
    #[error("room '{0}' can only be deleted by its creator")]
    NotCreator(String),

    /// The room still holds members other than the creator.
    #[error("room '{0}' has other participants")]
    NotEmpty(String),

    /// The user id is not registered.
    #[error("user '{0}' is not connected")]
    UserNotFound(String),
}

/// The server's single source of truth for rooms and connections.
#[derive(Debug, Default)]
pub struct Registry {
    /// Room id → room.
    rooms: HashMap<String, Room>,
    /// User id → live connection.
    connections: HashMap<String, Arc<Connection>>,
    /// Usernames of live connections plus reserved names.
    used_usernames: HashSet<String>,
}

impl Registry {
    /// A fresh registry containing only the lobby.
    pub fn new() -> Self {
        let mut registry = Self::default();

        registry.rooms.insert(LOBBY_ROOM.to_string(), Room {
            id: LOBBY_ROOM.to_string(),
            name: LOBBY_ROOM.to_string(),
            created_by: SYSTEM_USER.to_string(),
            created_at: SystemTime::now(),
            members: HashSet::new(),
        });
        registry.used_usernames.insert(SYSTEM_USER.to_string());

        registry
    }

    /// Whether a username is already taken (live connection or reserved).
    pub fn username_taken(&self, username: &str) -> bool {
        self.used_usernames.contains(username)
    }

    /// Reserve a username. Returns `false` if it was already taken.
    pub fn claim_username(&mut self, username: &str) -> bool {
        self.used_usernames.insert(username.to_string())
    }

    /// Free a claimed username without touching connections. Used when an
    /// upgrade fails between identity assignment and registration.
    pub fn release_username(&mut self, username: &str) {
        if username != SYSTEM_USER {
            self.used_usernames.remove(username);
        }
    }

    /// Resolve a client room hint: unknown or absent ids land in the lobby.
    pub fn room_or_lobby(&self, hint: Option<&str>) -> String {
        match hint {
            Some(id) if self.rooms.contains_key(id) => id.to_string(),
            _ => LOBBY_ROOM.to_string(),
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// The live connection for a user id.
    pub fn connection(&self, user_id: &str) -> Option<&Arc<Connection>> {
        self.connections.get(user_id)
    }

    /// A room by id.
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// First room matching a name.
    pub fn find_room_by_name(&self, name: &str) -> Option<&Room> {
        self.rooms.values().find(|room| room.name == name)
    }

    /// Wire summaries of every room.
    pub fn room_infos(&self) -> Vec<RoomInfo> {
        self.rooms.values().map(Room::info).collect()
    }

    /// Live connections of every member of a room.
    pub fn members_of(&self, room_id: &str) -> Vec<Arc<Connection>> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.members.iter().filter_map(|id| self.connections.get(id)).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Register a freshly upgraded connection and place it in `room_id`.
    ///
    /// The username must have been claimed beforehand (during the upgrade
    /// callback); the room id must already be resolved via
    /// [`room_or_lobby`](Self::room_or_lobby).
    pub fn insert_connection(&mut self, user_id: &str, connection: Arc<Connection>) {
        let room_id = connection.metadata().current_room_id;

        self.connections.insert(user_id.to_string(), connection);

        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.members.insert(user_id.to_string());
        }
    }

    /// Move a connection into the room named `name`.
    ///
    /// Removes it from its previous room, inserts it into the target, and
    /// updates the connection's `current_room_id`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RoomNotFound` if no room has that name
    /// - `RegistryError::UserNotFound` if the user id is not registered
    pub fn join_room_by_name(
        &mut self,
        user_id: &str,
        name: &str,
    ) -> Result<RoomInfo, RegistryError> {
        let room_id = self
            .find_room_by_name(name)
            .map(|room| room.id.clone())
            .ok_or_else(|| RegistryError::RoomNotFound(name.to_string()))?;

        self.move_to_room(user_id, &room_id)
    }

    /// Move a connection back to the lobby.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UserNotFound` if the user id is not registered
    pub fn leave_to_lobby(&mut self, user_id: &str) -> Result<RoomInfo, RegistryError> {
        self.move_to_room(user_id, LOBBY_ROOM)
    }

    fn move_to_room(&mut self, user_id: &str, room_id: &str) -> Result<RoomInfo, RegistryError> {
        let connection = self
            .connections
            .get(user_id)
            .cloned()
            .ok_or_else(|| RegistryError::UserNotFound(user_id.to_string()))?;

        for room in self.rooms.values_mut() {
            room.members.remove(user_id);
        }

        let room = self.rooms.get_mut(room_id).ok_or_else(|| {
            // Unreachable through the public paths (name was just resolved,
            // or the target is the lobby), but kept as a guard.
            RegistryError::RoomNotFound(room_id.to_string())
        })?;

        room.members.insert(user_id.to_string());
        connection.set_current_room(room_id);

        Ok(room.info())
    }

    /// Create a room named `name`, owned by the user with `creator_user_id`.
    ///
    /// The id is a fresh UUID v4. The creator is NOT moved into the room;
    /// joining is a separate request.
    pub fn create_room(&mut self, name: &str, creator_user_id: &str) -> RoomInfo {
        let id = Uuid::new_v4().to_string();

        let room = Room {
            id: id.clone(),
            name: name.to_string(),
            created_by: creator_user_id.to_string(),
            created_at: SystemTime::now(),
            members: HashSet::new(),
        };
        let info = room.info();
        self.rooms.insert(id, room);

        info
    }

    /// Delete the room named `name`.
    ///
    /// Only the creator may delete, and only while the room holds nobody
    /// except possibly the creator. If the creator was inside, they are moved
    /// to the lobby first. The lobby is owned by the reserved `system` user
    /// id and therefore can never pass the creator check.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RoomNotFound` if no room has that name
    /// - `RegistryError::NotCreator` if the requester did not create it
    /// - `RegistryError::NotEmpty` if someone other than the creator is inside
    pub fn delete_room(
        &mut self,
        name: &str,
        requester_user_id: &str,
    ) -> Result<RoomInfo, RegistryError> {
        let room = self
            .find_room_by_name(name)
            .ok_or_else(|| RegistryError::RoomNotFound(name.to_string()))?;
        let room_id = room.id.clone();

        if room.created_by != requester_user_id {
            return Err(RegistryError::NotCreator(name.to_string()));
        }

        let has_others = room.members.iter().any(|member| member != requester_user_id);
        if has_others {
            return Err(RegistryError::NotEmpty(name.to_string()));
        }

        if room.members.contains(requester_user_id) {
            self.leave_to_lobby(requester_user_id)?;
        }

        let removed = self.rooms.remove(&room_id).ok_or_else(|| {
            // The room existed a few lines up; only reachable if leave_to_lobby
            // could delete rooms, which it cannot.
            RegistryError::RoomNotFound(name.to_string())
        })?;

        Ok(removed.info())
    }

    /// Drop a connection entirely: out of its room, out of the connection
    /// map, username freed.
    ///
    /// Returns the connection and the id of the room it was last in, for the
    /// departure broadcast.
    pub fn remove_connection(&mut self, user_id: &str) -> Option<(Arc<Connection>, String)> {
        let connection = self.connections.remove(user_id)?;

        let metadata = connection.metadata();
        self.used_usernames.remove(&metadata.username);

        let mut last_room = metadata.current_room_id.clone();
        for room in self.rooms.values_mut() {
            if room.members.remove(user_id) {
                last_room = room.id.clone();
            }
        }

        Some((connection, last_room))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use sealwire_core::Latch;
    use sealwire_proto::WsMetadata;
    use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn test_connection(user_id: &str, username: &str, room_id: &str) -> Arc<Connection> {
        let metadata = WsMetadata {
            user_id: user_id.to_string(),
            username: username.to_string(),
            color: "#E6194B".to_string(),
            current_room_id: room_id.to_string(),
        };

        Connection::start(
            futures_util::sink::drain(),
            stream::pending::<Result<Message, WsError>>(),
            metadata,
            CancellationToken::new(),
        )
    }

    fn registry_with(users: &[(&str, &str)]) -> Registry {
        let mut registry = Registry::new();
        for (user_id, username) in users {
            assert!(registry.claim_username(username));
            registry.insert_connection(user_id, test_connection(user_id, username, LOBBY_ROOM));
        }
        registry
    }

    #[tokio::test]
    async fn lobby_exists_from_the_start() {
        let registry = Registry::new();

        let lobby = registry.room(LOBBY_ROOM).expect("lobby must exist");
        assert_eq!(lobby.name, LOBBY_ROOM);
        assert_eq!(lobby.created_by, SYSTEM_USER);
        assert!(registry.username_taken(SYSTEM_USER));
    }

    #[tokio::test]
    async fn new_connections_land_in_the_lobby() {
        let registry = registry_with(&[("u1", "Swift Lion"), ("u2", "Golden Eagle")]);

        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.members_of(LOBBY_ROOM).len(), 2);
        assert!(registry.username_taken("Swift Lion"));
    }

    #[tokio::test]
    async fn claim_username_rejects_duplicates() {
        let mut registry = Registry::new();

        assert!(registry.claim_username("Quiet Ghost"));
        assert!(!registry.claim_username("Quiet Ghost"));
        assert!(!registry.claim_username(SYSTEM_USER));
    }

    #[tokio::test]
    async fn room_hint_resolution_falls_back_to_lobby() {
        let mut registry = registry_with(&[("u1", "Silver Fox")]);
        let room = registry.create_room("den", "u1");

        assert_eq!(registry.room_or_lobby(None), LOBBY_ROOM);
        assert_eq!(registry.room_or_lobby(Some("no-such-room")), LOBBY_ROOM);
        assert_eq!(registry.room_or_lobby(Some(&room.id)), room.id);
    }

    #[tokio::test]
    async fn join_moves_between_rooms_and_updates_metadata() {
        let mut registry = registry_with(&[("u1", "Bold Ranger")]);
        registry.create_room("rust", "u1");

        let info = registry.join_room_by_name("u1", "rust").unwrap();
        assert_eq!(info.member_count, 1);

        // In exactly one room, and metadata agrees with the member set.
        assert!(registry.members_of(LOBBY_ROOM).is_empty());
        let members = registry.members_of(&info.id);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].metadata().current_room_id, info.id);
    }

    #[tokio::test]
    async fn join_unknown_room_fails() {
        let mut registry = registry_with(&[("u1", "Tiny Dragon")]);

        let result = registry.join_room_by_name("u1", "atlantis");
        assert_eq!(result, Err(RegistryError::RoomNotFound("atlantis".to_string())));
    }

    #[tokio::test]
    async fn join_unregistered_user_fails() {
        let mut registry = Registry::new();
        registry.create_room("rust", "u-creator");

        let result = registry.join_room_by_name("ghost", "rust");
        assert_eq!(result, Err(RegistryError::UserNotFound("ghost".to_string())));
    }

    #[tokio::test]
    async fn leave_returns_to_lobby() {
        let mut registry = registry_with(&[("u1", "Icy Breeze")]);
        registry.create_room("peaks", "u1");
        registry.join_room_by_name("u1", "peaks").unwrap();

        let info = registry.leave_to_lobby("u1").unwrap();
        assert_eq!(info.id, LOBBY_ROOM);
        assert_eq!(registry.members_of(LOBBY_ROOM).len(), 1);
    }

    #[tokio::test]
    async fn leave_then_rejoin_restores_membership() {
        let mut registry = registry_with(&[("u1", "Rapid River"), ("u2", "Frozen Lake")]);
        registry.create_room("delta", "u1");
        registry.join_room_by_name("u1", "delta").unwrap();
        registry.join_room_by_name("u2", "delta").unwrap();

        registry.leave_to_lobby("u1").unwrap();
        let info = registry.join_room_by_name("u1", "delta").unwrap();

        assert_eq!(info.member_count, 2);
    }

    #[tokio::test]
    async fn create_then_delete_restores_prior_state() {
        let mut registry = registry_with(&[("u1", "Lucky Clover")]);
        let rooms_before = registry.room_infos().len();

        registry.create_room("ephemeral", "u1");
        registry.delete_room("ephemeral", "u1").unwrap();

        assert_eq!(registry.room_infos().len(), rooms_before);
        assert!(registry.find_room_by_name("ephemeral").is_none());
    }

    #[tokio::test]
    async fn delete_by_non_creator_is_rejected() {
        let mut registry = registry_with(&[("u1", "Sharp Blade"), ("u2", "Sweet Honey")]);
        registry.create_room("forge", "u1");

        let result = registry.delete_room("forge", "u2");
        assert_eq!(result, Err(RegistryError::NotCreator("forge".to_string())));
    }

    #[tokio::test]
    async fn delete_with_other_participants_is_rejected() {
        let mut registry = registry_with(&[("u1", "Misty Valley"), ("u2", "Stormy Sky")]);
        registry.create_room("priv", "u1");
        registry.join_room_by_name("u2", "priv").unwrap();

        let result = registry.delete_room("priv", "u1");
        assert_eq!(result, Err(RegistryError::NotEmpty("priv".to_string())));
        assert!(registry.find_room_by_name("priv").is_some(), "room must persist");
    }

    #[tokio::test]
    async fn delete_moves_resident_creator_to_lobby() {
        let mut registry = registry_with(&[("u1", "Crystal Cave")]);
        registry.create_room("solo", "u1");
        registry.join_room_by_name("u1", "solo").unwrap();

        registry.delete_room("solo", "u1").unwrap();

        assert!(registry.find_room_by_name("solo").is_none());
        assert_eq!(registry.members_of(LOBBY_ROOM).len(), 1);
        let conn = registry.connection("u1").unwrap();
        assert_eq!(conn.metadata().current_room_id, LOBBY_ROOM);
    }

    #[tokio::test]
    async fn lobby_cannot_be_deleted() {
        let mut registry = registry_with(&[("u1", "Dark Phantom")]);

        let result = registry.delete_room(LOBBY_ROOM, "u1");
        assert_eq!(result, Err(RegistryError::NotCreator(LOBBY_ROOM.to_string())));
    }

    #[tokio::test]
    async fn recycled_username_grants_no_rights_over_old_rooms() {
        let mut registry = registry_with(&[("u1", "Velvet Fox")]);
        registry.create_room("forge", "u1");

        // The creator disconnects; their username returns to the pool.
        registry.remove_connection("u1");
        assert!(!registry.username_taken("Velvet Fox"));

        // A different user picks up the freed name. Ownership follows the
        // user id, so the room stays out of reach.
        assert!(registry.claim_username("Velvet Fox"));
        registry.insert_connection("u2", test_connection("u2", "Velvet Fox", LOBBY_ROOM));

        let result = registry.delete_room("forge", "u2");
        assert_eq!(result, Err(RegistryError::NotCreator("forge".to_string())));
    }

    #[tokio::test]
    async fn remove_connection_frees_username_and_reports_last_room() {
        let mut registry = registry_with(&[("u1", "Blue Lagoon")]);
        registry.create_room("reef", "u1");
        registry.join_room_by_name("u1", "reef").unwrap();

        let (_, last_room) = registry.remove_connection("u1").unwrap();

        let reef = registry.find_room_by_name("reef").unwrap();
        assert_eq!(last_room, reef.id);
        assert!(!registry.username_taken("Blue Lagoon"));
        assert_eq!(registry.connection_count(), 0);
        assert!(reef.members.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_connection_is_a_no_op() {
        let mut registry = Registry::new();
        assert!(registry.remove_connection("nobody").is_none());
    }

    /// A Latch clone observes its source; used by the hub to gate dispatch
    /// on `writer_ready`, so pin the behavior here next to its consumer.
    #[tokio::test]
    async fn connection_latches_are_shared_through_the_registry() {
        let registry = registry_with(&[("u1", "Gentle Breeze")]);

        let conn = registry.connection("u1").unwrap();
        let latch: Latch = conn.keys_exchanged().clone();
        conn.set_symmetric_key(sealwire_crypto::derive_key(&[1u8; 32]));

        assert!(latch.is_fired());
    }
}
