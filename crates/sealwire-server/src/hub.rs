//! Accept loop and frame dispatch.
//!
//! One handler task per connection. Identity is assigned inside the upgrade
//! header callback, before the HTTP handshake completes, so the client learns
//! its username/color/room from the upgrade response headers. Dispatch
//! mutates the registry under its write lock and performs all socket I/O
//! after the lock is released; the guard is not `Send`, so the compiler
//! enforces the split.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex, PoisonError, RwLock},
};

use futures_util::StreamExt;
use sealwire_core::{Connection, WriteKind};
use sealwire_proto::{Frame, FrameKind, WsMetadata};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{HeaderValue, StatusCode},
    },
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::HubError,
    identity,
    registry::{Registry, RegistryError},
};

/// Color of server-originated `success` status frames.
const SUCCESS_COLOR: &str = "#00FF00";

/// Color of server-originated `error` status frames.
const ERROR_COLOR: &str = "#FF0000";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`.
    pub bind_address: String,
    /// Upgrades are refused beyond this many live connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8080".to_string(), max_connections: 10_000 }
    }
}

/// Identity assigned during the upgrade callback.
struct AssignedIdentity {
    user_id: String,
    username: String,
    color: String,
    room_id: String,
}

/// The relay server.
pub struct Server {
    listener: TcpListener,
    registry: Arc<RwLock<Registry>>,
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listener. The registry starts with only the lobby.
    ///
    /// # Errors
    ///
    /// - `HubError::Bind` if the address cannot be bound
    pub async fn bind(config: ServerConfig) -> Result<Self, HubError> {
        let listener = TcpListener::bind(&config.bind_address).await.map_err(HubError::Bind)?;

        Ok(Self {
            listener,
            registry: Arc::new(RwLock::new(Registry::new())),
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Local address the listener is bound to.
    ///
    /// # Errors
    ///
    /// - `HubError::LocalAddr` if the OS cannot report the address
    pub fn local_addr(&self) -> Result<SocketAddr, HubError> {
        self.listener.local_addr().map_err(HubError::LocalAddr)
    }

    /// Token that stops the accept loop and every connection task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shut down.
    pub async fn run(self) -> Result<(), HubError> {
        tracing::info!(address = %self.local_addr()?, "ws server started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&self.registry);
                        let max_connections = self.config.max_connections;
                        let shutdown = self.shutdown.clone();

                        tokio::spawn(async move {
                            handle_socket(stream, peer, registry, max_connections, shutdown)
                                .await;
                        });
                    },
                    Err(e) => tracing::error!(error = %e, "accept error"),
                },
                () = self.shutdown.cancelled() => {
                    tracing::info!("server shutting down");
                    return Ok(());
                },
            }
        }
    }
}

fn read_registry(registry: &RwLock<Registry>) -> std::sync::RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_registry(registry: &RwLock<Registry>) -> std::sync::RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

/// Upgrade, register, greet, then run the read loop until the socket dies.
async fn handle_socket(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<RwLock<Registry>>,
    max_connections: usize,
    shutdown: CancellationToken,
) {
    let assigned: Arc<StdMutex<Option<AssignedIdentity>>> = Arc::default();

    let websocket = {
        let slot = Arc::clone(&assigned);
        let callback_registry = Arc::clone(&registry);

        let callback = move |request: &Request, mut response: Response| {
            if request.uri().path() != "/ws" {
                let mut refusal = ErrorResponse::new(Some("not found".to_string()));
                *refusal.status_mut() = StatusCode::NOT_FOUND;
                return Err(refusal);
            }

            let hint = |name: &str| {
                request.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
            };
            let username_hint = hint("username");
            let color_hint = hint("color");
            let room_hint = hint("roomId");

            let mut registry = callback_registry.write().unwrap_or_else(PoisonError::into_inner);

            if registry.connection_count() >= max_connections {
                let mut refusal = ErrorResponse::new(Some("server full".to_string()));
                *refusal.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                return Err(refusal);
            }

            // A reconnecting client sends its last-known identity; honor it
            // only while the username is still free.
            let username = match username_hint {
                Some(name) if !name.is_empty() && registry.claim_username(&name) => name,
                _ => loop {
                    let candidate = identity::random_username();
                    if registry.claim_username(candidate) {
                        break candidate.to_string();
                    }
                },
            };
            let color = match color_hint {
                Some(color) if !color.is_empty() => color,
                _ => identity::random_color().to_string(),
            };
            let room_id = registry.room_or_lobby(room_hint.as_deref());
            let user_id = Uuid::new_v4().to_string();

            // The assigned identity must reach the client BEFORE the upgrade
            // completes; these are response headers, not a frame.
            let headers = response.headers_mut();
            for (name, value) in
                [("username", &username), ("color", &color), ("roomId", &room_id)]
            {
                #[allow(clippy::expect_used)]
                headers.insert(
                    name,
                    HeaderValue::from_str(value)
                        .expect("invariant: assigned identity is a valid header value"),
                );
            }

            *slot.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(AssignedIdentity { user_id, username, color, room_id });

            Ok(response)
        };

        match accept_hdr_async(stream, callback).await {
            Ok(websocket) => websocket,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "upgrade failed");
                // The callback may have claimed a username already.
                if let Some(identity) =
                    assigned.lock().unwrap_or_else(PoisonError::into_inner).take()
                {
                    write_registry(&registry).release_username(&identity.username);
                }
                return;
            },
        }
    };

    let Some(identity) = assigned.lock().unwrap_or_else(PoisonError::into_inner).take() else {
        return;
    };

    let metadata = WsMetadata {
        user_id: identity.user_id.clone(),
        username: identity.username.clone(),
        color: identity.color.clone(),
        current_room_id: identity.room_id.clone(),
    };

    let token = shutdown.child_token();
    let (sink, stream) = websocket.split();
    let connection = Connection::start(sink, stream, metadata.clone(), token.clone());

    connection.writer_ready().fired().await;

    write_registry(&registry).insert_connection(&identity.user_id, Arc::clone(&connection));

    tracing::info!(
        username = %identity.username,
        color = %identity.color,
        room = %identity.room_id,
        "new connection"
    );

    greet(&connection, &registry, &identity.room_id).await;
    announce_entry(&registry, &metadata).await;

    read_loop(&connection, &registry, &identity.user_id, &token).await;

    disconnect(&registry, &identity.user_id).await;
}

/// Send the newcomer the members of its room and the full room list.
async fn greet(connection: &Connection, registry: &RwLock<Registry>, room_id: &str) {
    let (users, rooms) = {
        let registry = read_registry(registry);
        let users: Vec<WsMetadata> =
            registry.members_of(room_id).iter().map(|member| member.metadata()).collect();
        (serde_json::to_vec(&users), serde_json::to_vec(&registry.room_infos()))
    };

    match (users, rooms) {
        (Ok(users), Ok(rooms)) => {
            let metadata = connection.metadata();
            send_frame(
                connection,
                &Frame::with_value(FrameKind::CurrentUsers, users, metadata.clone()),
            )
            .await;
            send_frame(connection, &Frame::with_value(FrameKind::AvailableRooms, rooms, metadata))
                .await;
        },
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "could not serialize greeting");
        },
    }
}

/// Tell every other member of the newcomer's room that it entered.
async fn announce_entry(registry: &RwLock<Registry>, newcomer: &WsMetadata) {
    let peers = peers_in_room(registry, &newcomer.current_room_id, &newcomer.user_id);

    let frame = Frame::new(FrameKind::UserEnteredChat, newcomer.clone());
    for peer in peers {
        send_frame(&peer, &frame).await;
    }
}

/// Decode and dispatch inbound frames until the socket dies or the server
/// shuts down.
async fn read_loop(
    connection: &Arc<Connection>,
    registry: &Arc<RwLock<Registry>>,
    user_id: &str,
    token: &CancellationToken,
) {
    loop {
        let bytes = tokio::select! {
            result = connection.read() => match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(error = %e, "read loop ending");
                    return;
                },
            },
            () = token.cancelled() => return,
        };

        let text = String::from_utf8_lossy(&bytes);
        let frame = match Frame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                // Malformed input costs the sender one frame, not the socket.
                tracing::warn!(error = %e, "dropping undecodable frame");
                continue;
            },
        };

        dispatch(frame, connection, registry, user_id).await;
    }
}

/// Apply one client frame's side effects and replies.
async fn dispatch(
    frame: Frame,
    connection: &Arc<Connection>,
    registry: &Arc<RwLock<Registry>>,
    user_id: &str,
) {
    match frame.kind {
        FrameKind::ExchangeKeys => handle_exchange_keys(frame, connection).await,
        FrameKind::EncryptedMessage => handle_encrypted_message(frame, connection, registry).await,
        FrameKind::JoinRoom => handle_join_room(&frame, connection, registry, user_id).await,
        FrameKind::LeaveRoom => handle_leave_room(connection, registry, user_id).await,
        FrameKind::CreateRoom => handle_create_room(&frame, connection, registry, user_id).await,
        FrameKind::DeleteRoom => handle_delete_room(&frame, connection, registry, user_id).await,
        other => {
            tracing::warn!(kind = %other, "ignoring frame with unhandled type");
        },
    }
}

/// Server leg of the KEM handshake: encapsulate against the client's key,
/// store the derived secret, return the ciphertext.
async fn handle_exchange_keys(frame: Frame, connection: &Arc<Connection>) {
    let Some(encap_key) = frame.value else {
        tracing::warn!("exchange_keys without a key payload");
        return;
    };

    match sealwire_crypto::encapsulate(&encap_key) {
        Ok((shared_secret, kem_ciphertext)) => {
            connection.set_symmetric_key(sealwire_crypto::derive_key(&shared_secret));

            let reply = Frame::with_value(
                FrameKind::ExchangeKeys,
                kem_ciphertext,
                connection.metadata(),
            );
            send_frame(connection, &reply).await;
        },
        Err(e) => {
            // Fatal for this connection's crypto; without a key the peer can
            // never submit chat, but the socket itself is left alone.
            tracing::error!(error = %e, "handshake failed");
        },
    }
}

/// Decrypt under the sender's key, then re-encrypt per recipient and fan out
/// to the sender's current room.
async fn handle_encrypted_message(
    frame: Frame,
    connection: &Arc<Connection>,
    registry: &Arc<RwLock<Registry>>,
) {
    let Some(key) = connection.symmetric_key() else {
        tracing::warn!("encrypted_message before key exchange");
        return;
    };
    let (Some(nonce), Some(ciphertext)) = (frame.nonce, frame.value) else {
        tracing::warn!("encrypted_message missing ciphertext or nonce");
        return;
    };

    let plaintext = match sealwire_crypto::decrypt(&key, &nonce, &ciphertext) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecryptable frame");
            return;
        },
    };

    let sender = connection.metadata();
    let line = format!("{}: {}", sender.username, String::from_utf8_lossy(&plaintext));

    let recipients = peers_in_room(registry, &sender.current_room_id, &sender.user_id);

    for recipient in recipients {
        // Each pair has its own key; ciphertext is never forwarded verbatim.
        let Some(recipient_key) = recipient.symmetric_key() else {
            tracing::debug!("skipping recipient without completed handshake");
            continue;
        };

        match sealwire_crypto::encrypt(&recipient_key, line.as_bytes()) {
            Ok((nonce, ciphertext)) => {
                send_frame(&recipient, &Frame::encrypted(ciphertext, nonce, sender.clone())).await;
            },
            Err(e) => tracing::error!(error = %e, "relay encryption failed"),
        }
    }
}

async fn handle_join_room(
    frame: &Frame,
    connection: &Arc<Connection>,
    registry: &Arc<RwLock<Registry>>,
    user_id: &str,
) {
    let name = frame.value_text();

    let result = write_registry(registry).join_room_by_name(user_id, &name);
    match result {
        Ok(info) => {
            send_status(connection, FrameKind::Success, &format!("Joined room '{name}'")).await;
            send_room_result(connection, FrameKind::JoinedRoom, &info).await;
        },
        Err(e) => send_registry_error(connection, &e).await,
    }
}

async fn handle_leave_room(
    connection: &Arc<Connection>,
    registry: &Arc<RwLock<Registry>>,
    user_id: &str,
) {
    let result = write_registry(registry).leave_to_lobby(user_id);
    match result {
        Ok(info) => {
            send_status(connection, FrameKind::Success, "Left room and returned to the lobby")
                .await;
            send_room_result(connection, FrameKind::LeftRoom, &info).await;
        },
        Err(e) => send_registry_error(connection, &e).await,
    }
}

async fn handle_create_room(
    frame: &Frame,
    connection: &Arc<Connection>,
    registry: &Arc<RwLock<Registry>>,
    user_id: &str,
) {
    let name = frame.value_text();
    if name.trim().is_empty() {
        send_status(connection, FrameKind::Error, "room name required").await;
        return;
    }

    let info = write_registry(registry).create_room(&name, user_id);

    tracing::info!(room = %name, id = %info.id, creator = %user_id, "room created");
    send_status(connection, FrameKind::Success, &format!("Created room '{name}'")).await;
    send_room_result(connection, FrameKind::CreatedRoom, &info).await;
}

async fn handle_delete_room(
    frame: &Frame,
    connection: &Arc<Connection>,
    registry: &Arc<RwLock<Registry>>,
    user_id: &str,
) {
    let name = frame.value_text();

    let result = write_registry(registry).delete_room(&name, user_id);
    match result {
        Ok(info) => {
            tracing::info!(room = %name, "room deleted");
            send_status(connection, FrameKind::Success, &format!("Deleted room '{name}'")).await;
            send_room_result(connection, FrameKind::DeletedRoom, &info).await;
        },
        Err(e) => send_registry_error(connection, &e).await,
    }
}

/// Remove a dead connection and tell its last room about the departure.
async fn disconnect(registry: &Arc<RwLock<Registry>>, user_id: &str) {
    let removed = write_registry(registry).remove_connection(user_id);

    let Some((connection, last_room)) = removed else {
        return;
    };
    connection.shutdown();

    let metadata = connection.metadata();
    tracing::info!(username = %metadata.username, room = %last_room, "user disconnected");

    let peers = peers_in_room(registry, &last_room, user_id);
    let frame = Frame::new(FrameKind::UserLeftChat, metadata);
    for peer in peers {
        send_frame(&peer, &frame).await;
    }
}

/// Members of a room except `excluded_user_id`, snapshot under the read lock.
fn peers_in_room(
    registry: &RwLock<Registry>,
    room_id: &str,
    excluded_user_id: &str,
) -> Vec<Arc<Connection>> {
    read_registry(registry)
        .members_of(room_id)
        .into_iter()
        .filter(|peer| peer.metadata().user_id != excluded_user_id)
        .collect()
}

/// Encode and send, logging instead of propagating: a failed send to one
/// peer must not disturb the others.
async fn send_frame(connection: &Connection, frame: &Frame) {
    match frame.encode() {
        Ok(text) => {
            if let Err(e) = connection.send(text.into_bytes(), WriteKind::Text).await {
                tracing::debug!(error = %e, kind = %frame.kind, "send failed");
            }
        },
        Err(e) => tracing::error!(error = %e, "frame encode failed"),
    }
}

/// A `success`/`error` status frame authored by `system`.
async fn send_status(connection: &Connection, kind: FrameKind, text: &str) {
    let color = if kind == FrameKind::Error { ERROR_COLOR } else { SUCCESS_COLOR };
    let frame = Frame::with_value(kind, text, WsMetadata::system(color));
    send_frame(connection, &frame).await;
}

/// A room-result frame (`joined_room` etc.) carrying the JSON room summary.
async fn send_room_result(
    connection: &Connection,
    kind: FrameKind,
    info: &sealwire_proto::RoomInfo,
) {
    match serde_json::to_vec(info) {
        Ok(json) => {
            let frame = Frame::with_value(kind, json, connection.metadata());
            send_frame(connection, &frame).await;
        },
        Err(e) => tracing::error!(error = %e, "room info encode failed"),
    }
}

async fn send_registry_error(connection: &Connection, error: &RegistryError) {
    send_status(connection, FrameKind::Error, &error.to_string()).await;
}
