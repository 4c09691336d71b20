//! Connection lifecycle supervisor.
//!
//! One supervisor per user process. It owns the ML-KEM keypair (which
//! survives reconnects), the live connection (which does not), the reconnect
//! loop, and the dead-letter queue.
//!
//! # Reconnect model
//!
//! Socket failures funnel into a 1-buffered channel, so any number of
//! concurrent failure signals collapse into one reconnect. Attempt `n` waits
//! `2^(n-1)` seconds before dialing; after [`MAX_ATTEMPTS`] failed attempts
//! the supervisor fires its shutdown latch and the process exits cleanly.
//! A successful dial resets the counter to 1.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex as StdMutex, PoisonError,
};
use std::time::Duration;

use futures_util::StreamExt;
use sealwire_core::{Connection, Latch, WriteKind, PING_PERIOD};
use sealwire_crypto::KeyPair;
use sealwire_proto::{Frame, FrameKind, WsMetadata};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex as TokioMutex,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue},
};
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::UiEmitter,
    commands::{parse_line, Command},
    error::ClientError,
};

/// Reconnect budget. Exhausting it is a clean shutdown, not an error.
pub const MAX_ATTEMPTS: u32 = 5;

/// Dead-letter queue capacity. Lines submitted beyond this while offline are
/// dropped with a log line.
pub const DLQ_DEPTH: usize = 10;

/// Color used for locally generated error text.
const LOCAL_ERROR_COLOR: &str = "#FF0000";

/// Backoff before dialing attempt `n` (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1))
}

/// Last-seen identity, passed as headers on the next dial so the server can
/// preserve continuity across reconnects.
#[derive(Debug, Clone, Default)]
struct ReconnectHint {
    username: String,
    color: String,
    room_id: String,
}

impl ReconnectHint {
    fn metadata(&self) -> WsMetadata {
        WsMetadata {
            user_id: String::new(),
            username: self.username.clone(),
            color: self.color.clone(),
            current_room_id: self.room_id.clone(),
        }
    }
}

/// Orchestrates connect/reconnect/handshake/send/receive for one user.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    keypair: KeyPair,
    ui: UiEmitter,
    connection: StdMutex<Option<Arc<Connection>>>,
    reconnect_tx: mpsc::Sender<()>,
    dlq_tx: mpsc::Sender<String>,
    dlq_rx: TokioMutex<mpsc::Receiver<String>>,
    connected: AtomicBool,
    attempts: AtomicU32,
    hint: StdMutex<ReconnectHint>,
    shutdown: Latch,
}

impl Supervisor {
    /// Create the supervisor and start its reconnect loop.
    ///
    /// The keypair is generated here, once; reconnects reuse it by design, so
    /// a server that honors the identity hint re-derives a fresh symmetric
    /// key against the same encapsulation key.
    pub fn new(url: impl Into<String>, ui: UiEmitter) -> Self {
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (dlq_tx, dlq_rx) = mpsc::channel(DLQ_DEPTH);

        let inner = Arc::new(Inner {
            url: url.into(),
            keypair: KeyPair::generate(),
            ui,
            connection: StdMutex::new(None),
            reconnect_tx,
            dlq_tx,
            dlq_rx: TokioMutex::new(dlq_rx),
            connected: AtomicBool::new(false),
            attempts: AtomicU32::new(1),
            hint: StdMutex::new(ReconnectHint::default()),
            shutdown: Latch::new(),
        });

        tokio::spawn(Arc::clone(&inner).reconnect_loop(reconnect_rx));

        Self { inner }
    }

    /// Latch that fires on clean shutdown (quit command or exhausted
    /// reconnect budget). The process should exit 0 when it fires.
    pub fn shutdown_latch(&self) -> Latch {
        self.inner.shutdown.clone()
    }

    /// Dial immediately (TUI `connect`). Failures hand over to the backoff
    /// loop.
    pub async fn connect(&self) {
        if let Err(e) = self.inner.connect_once().await {
            tracing::warn!(error = %e, "connect failed");
            self.inner.trigger_reconnect();
        }
    }

    /// Process one line the user typed.
    pub async fn submit_line(&self, line: &str) {
        self.inner.submit_line(line).await;
    }

    /// Drop the socket and fire the shutdown latch.
    pub async fn quit(&self) {
        self.inner.quit().await;
    }

    /// Remaining dead-letter queue capacity (test observability).
    #[cfg(test)]
    pub(crate) fn dlq_free_slots(&self) -> usize {
        self.inner.dlq_tx.capacity()
    }
}

impl Inner {
    fn hint(&self) -> ReconnectHint {
        self.hint.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn current_connection(&self) -> Option<Arc<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Queue exactly one reconnect. The 1-buffered channel makes concurrent
    /// triggers (read error, ping error, failed send) idempotent.
    fn trigger_reconnect(&self) {
        if self.reconnect_tx.try_send(()).is_ok() {
            tracing::info!("reconnect triggered");
        }
    }

    async fn reconnect_loop(self: Arc<Self>, mut reconnect_rx: mpsc::Receiver<()>) {
        while reconnect_rx.recv().await.is_some() {
            self.connected.store(false, Ordering::SeqCst);

            // Cancel the routines still attached to the dead socket.
            if let Some(connection) = self.current_connection() {
                connection.shutdown();
            }

            let attempt = self.attempts.load(Ordering::SeqCst);
            let metadata = self.hint().metadata();
            if attempt == 1 {
                self.ui.emit(Frame::new(FrameKind::Disconnected, metadata));
            } else {
                self.ui.emit(Frame::new(FrameKind::Reconnecting, metadata));
            }

            if attempt > MAX_ATTEMPTS {
                tracing::warn!("burned through all reconnect attempts");
                self.quit().await;
                return;
            }

            let delay = backoff_delay(attempt);
            tracing::info!(attempt, max = MAX_ATTEMPTS, ?delay, "scheduling reconnect");
            tokio::time::sleep(delay).await;
            self.attempts.store(attempt + 1, Ordering::SeqCst);

            if let Err(e) = self.connect_once().await {
                tracing::warn!(error = %e, attempt, "reconnect attempt failed");
                self.trigger_reconnect();
            }
        }
    }

    /// Dial, register routines, run the handshake, drain the DLQ.
    async fn connect_once(self: &Arc<Self>) -> Result<(), ClientError> {
        tracing::info!(url = %self.url, "connecting");

        // A repeated `connect` must not leak a previous live socket.
        if let Some(previous) = self.current_connection() {
            previous.shutdown();
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Url(e.to_string()))?;

        // Identity continuity across reconnects rides in the upgrade request.
        let hint = self.hint();
        for (name, value) in
            [("username", &hint.username), ("color", &hint.color), ("roomId", &hint.room_id)]
        {
            if value.is_empty() {
                continue;
            }
            if let Ok(value) = HeaderValue::from_str(value) {
                request.headers_mut().insert(name, value);
            }
        }

        let (websocket, response) =
            connect_async(request).await.map_err(|e| ClientError::Dial(e.to_string()))?;

        // The server's word is final on identity.
        let assigned = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let metadata = WsMetadata {
            user_id: String::new(),
            username: assigned("username"),
            color: assigned("color"),
            current_room_id: assigned("roomId"),
        };
        *self.hint.lock().unwrap_or_else(PoisonError::into_inner) = ReconnectHint {
            username: metadata.username.clone(),
            color: metadata.color.clone(),
            room_id: metadata.current_room_id.clone(),
        };

        let token = CancellationToken::new();
        let (sink, stream) = websocket.split();
        let connection = Connection::start(sink, stream, metadata.clone(), token.clone());

        connection.writer_ready().fired().await;

        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&connection));
        self.connected.store(true, Ordering::SeqCst);
        self.attempts.store(1, Ordering::SeqCst);

        tracing::info!(username = %metadata.username, "connected");

        tokio::spawn(Arc::clone(self).read_loop(Arc::clone(&connection), token.clone()));
        tokio::spawn(Arc::clone(self).ping_loop(Arc::clone(&connection), token));

        self.ui.emit(Frame::new(FrameKind::Connected, metadata.clone()));

        // Handshake leg one: ship the encapsulation key. A failure here is
        // crypto-fatal, not transport-fatal: log, keep the socket, do not
        // reconnect. The keypair is reused on the next connect.
        let exchange =
            Frame::with_value(FrameKind::ExchangeKeys, self.keypair.encap_key_bytes(), metadata);
        match exchange.encode() {
            Ok(text) => {
                if let Err(e) = connection.send(text.into_bytes(), WriteKind::Text).await {
                    tracing::error!(error = %e, "could not send encapsulation key");
                    return Ok(());
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "could not encode exchange_keys");
                return Ok(());
            },
        }

        // Outgoing sends hit the DLQ until the counterpart frame latches the
        // key; then the queue drains in FIFO order.
        tokio::select! {
            () = connection.keys_exchanged().fired() => self.drain_dlq().await,
            () = connection.writer_closed().fired() => {},
        }

        Ok(())
    }

    async fn read_loop(self: Arc<Self>, connection: Arc<Connection>, token: CancellationToken) {
        tracing::info!("starting read loop");

        loop {
            let bytes = tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!("read loop cancelled");
                    return;
                },
                result = connection.read() => match result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "read failed");
                        // The socket is dead; close the writer so nothing
                        // blocks on it, then hand over to the backoff loop.
                        connection.shutdown();
                        self.trigger_reconnect();
                        return;
                    },
                },
            };

            let text = String::from_utf8_lossy(&bytes);
            match Frame::decode(&text) {
                Ok(frame) => self.handle_server_frame(frame, &connection).await,
                Err(e) => tracing::warn!(error = %e, "dropping undecodable frame"),
            }
        }
    }

    async fn ping_loop(self: Arc<Self>, connection: Arc<Connection>, token: CancellationToken) {
        tracing::info!("starting ping routine");

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + PING_PERIOD, PING_PERIOD);

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!("ping routine cancelled");
                    return;
                },
                _ = ticker.tick() => {
                    tracing::debug!("pinging server");
                    if let Err(e) = connection.send(Vec::new(), WriteKind::Ping).await {
                        tracing::warn!(error = %e, "ping failed");
                        self.trigger_reconnect();
                        return;
                    }
                },
            }
        }
    }

    /// Dispatch one frame from the server.
    async fn handle_server_frame(&self, frame: Frame, connection: &Arc<Connection>) {
        match frame.kind {
            FrameKind::ExchangeKeys => {
                let Some(kem_ciphertext) = frame.value else {
                    tracing::warn!("exchange_keys reply without ciphertext");
                    return;
                };

                match self.keypair.decapsulate(&kem_ciphertext) {
                    Ok(shared_secret) => {
                        connection.set_symmetric_key(sealwire_crypto::derive_key(&shared_secret));
                        tracing::info!("keys exchanged");
                        self.ui.emit(Frame::new(FrameKind::KeysExchanged, connection.metadata()));
                    },
                    Err(e) => {
                        // Crypto-fatal: no key will ever exist on this
                        // socket, so stop sending on it entirely. No
                        // reconnect; the keypair is reused next connect.
                        tracing::error!(error = %e, "handshake failed");
                        self.connected.store(false, Ordering::SeqCst);
                        connection.shutdown();
                    },
                }
            },

            FrameKind::EncryptedMessage => {
                let Some(key) = connection.symmetric_key() else {
                    tracing::warn!("encrypted message before key exchange");
                    return;
                };
                let (Some(nonce), Some(ciphertext)) = (frame.nonce, frame.value) else {
                    tracing::warn!("encrypted message missing ciphertext or nonce");
                    return;
                };

                match sealwire_crypto::decrypt(&key, &nonce, &ciphertext) {
                    Ok(plaintext) => {
                        self.ui.emit(Frame::with_value(
                            FrameKind::Message,
                            plaintext,
                            frame.metadata,
                        ));
                    },
                    Err(e) => tracing::warn!(error = %e, "dropping undecryptable frame"),
                }
            },

            FrameKind::JoinedRoom | FrameKind::LeftRoom => {
                // Track the authoritative room for the reconnect hint.
                let room_id = frame.metadata.current_room_id.clone();
                connection.set_current_room(&room_id);
                self.hint.lock().unwrap_or_else(PoisonError::into_inner).room_id = room_id;
                self.ui.emit(frame);
            },

            FrameKind::UserEnteredChat
            | FrameKind::UserLeftChat
            | FrameKind::CurrentUsers
            | FrameKind::CreatedRoom
            | FrameKind::DeletedRoom
            | FrameKind::AvailableRooms => self.ui.emit(frame),

            FrameKind::Success => {
                let mut frame = frame;
                frame.metadata.color = "#00FF00".to_string();
                self.ui.emit(frame);
            },

            FrameKind::Error => {
                let mut frame = frame;
                frame.metadata.color = LOCAL_ERROR_COLOR.to_string();
                self.ui.emit(frame);
            },

            other => tracing::warn!(kind = %other, "ignoring frame with unhandled type"),
        }
    }

    /// Route one typed line: chat, room command, quit, or local error.
    async fn submit_line(&self, line: &str) {
        match parse_line(line) {
            Command::Empty => {},
            Command::Quit => self.quit().await,
            Command::Invalid(text) => {
                let mut metadata = self.hint().metadata();
                metadata.color = LOCAL_ERROR_COLOR.to_string();
                self.ui.emit(Frame::with_value(FrameKind::Message, text, metadata));
            },
            Command::Chat(text) => self.send_chat(&text, line).await,
            Command::Join(name) => self.send_room_op(FrameKind::JoinRoom, &name, line).await,
            Command::Leave(name) => self.send_room_op(FrameKind::LeaveRoom, &name, line).await,
            Command::Create(name) => self.send_room_op(FrameKind::CreateRoom, &name, line).await,
            Command::Delete(name) => self.send_room_op(FrameKind::DeleteRoom, &name, line).await,
        }
    }

    /// The connection, if it is usable for application frames right now.
    fn usable_connection(&self) -> Option<Arc<Connection>> {
        if !self.connected.load(Ordering::SeqCst) {
            return None;
        }
        self.current_connection().filter(|c| c.keys_exchanged().is_fired())
    }

    async fn send_chat(&self, text: &str, original_line: &str) {
        let Some(connection) = self.usable_connection() else {
            self.push_dlq(original_line);
            return;
        };
        let Some(key) = connection.symmetric_key() else {
            self.push_dlq(original_line);
            return;
        };

        let frame = match sealwire_crypto::encrypt(&key, text.as_bytes()) {
            Ok((nonce, ciphertext)) => {
                Frame::encrypted(ciphertext, nonce, connection.metadata())
            },
            Err(e) => {
                tracing::error!(error = %e, "encryption failed");
                return;
            },
        };

        self.send_or_dlq(&connection, frame, original_line).await;
    }

    async fn send_room_op(&self, kind: FrameKind, name: &str, original_line: &str) {
        let Some(connection) = self.usable_connection() else {
            self.push_dlq(original_line);
            return;
        };

        let frame = Frame::with_value(kind, name, connection.metadata());
        self.send_or_dlq(&connection, frame, original_line).await;
    }

    async fn send_or_dlq(&self, connection: &Connection, frame: Frame, original_line: &str) {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "frame encode failed");
                return;
            },
        };

        if let Err(e) = connection.send(text.into_bytes(), WriteKind::Text).await {
            tracing::warn!(error = %e, "send failed, queueing for redelivery");
            self.push_dlq(original_line);
            if !self.shutdown.is_fired() {
                self.trigger_reconnect();
            }
        }
    }

    /// Queue a line for redelivery after the next handshake. Lossy when
    /// full: the line is dropped with a visible log and the TUI hears
    /// nothing.
    fn push_dlq(&self, line: &str) {
        match self.dlq_tx.try_send(line.to_string()) {
            Ok(()) => tracing::info!("queued message for redelivery"),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("dead-letter queue full, dropping message");
            },
            Err(TrySendError::Closed(_)) => {},
        }
    }

    /// Resubmit queued lines in FIFO order through the normal send path.
    ///
    /// Only the lines queued before this drain are attempted; anything that
    /// fails and re-queues itself waits for the next handshake. At-least-once
    /// semantics: nothing guards against a line that was actually delivered
    /// right before the socket died.
    async fn drain_dlq(&self) {
        let pending: Vec<String> = {
            let mut dlq_rx = self.dlq_rx.lock().await;
            let mut pending = Vec::new();
            while let Ok(line) = dlq_rx.try_recv() {
                pending.push(line);
            }
            pending
        };

        for line in pending {
            tracing::info!("sending queued message");
            self.submit_line(&line).await;
        }
    }

    async fn quit(&self) {
        tracing::info!("closing connection");

        if let Some(connection) = self.current_connection() {
            let _ = connection.send(Vec::new(), WriteKind::Close).await;
            connection.shutdown();
        }

        self.shutdown.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::UiEmitter;

    fn offline_supervisor() -> (Supervisor, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let (ui, ui_rx) = UiEmitter::new();
        // Nothing listens on this port; the supervisor stays offline.
        (Supervisor::new("ws://127.0.0.1:9", ui), ui_rx)
    }

    #[test]
    fn backoff_is_exactly_one_two_four_eight_sixteen() {
        let delays: Vec<u64> =
            (1..=MAX_ATTEMPTS).map(|n| backoff_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[tokio::test]
    async fn offline_chat_lands_in_the_dlq() {
        let (supervisor, _ui_rx) = offline_supervisor();

        supervisor.submit_line("queued1").await;
        supervisor.submit_line("queued2").await;

        assert_eq!(supervisor.dlq_free_slots(), DLQ_DEPTH - 2);
    }

    #[tokio::test]
    async fn dlq_drops_beyond_capacity() {
        let (supervisor, _ui_rx) = offline_supervisor();

        for i in 0..DLQ_DEPTH + 1 {
            supervisor.submit_line(&format!("line {i}")).await;
        }

        // The 11th is dropped, not queued.
        assert_eq!(supervisor.dlq_free_slots(), 0);
    }

    #[tokio::test]
    async fn room_commands_also_queue_while_offline() {
        let (supervisor, _ui_rx) = offline_supervisor();

        supervisor.submit_line("/join rust").await;

        assert_eq!(supervisor.dlq_free_slots(), DLQ_DEPTH - 1);
    }

    #[tokio::test]
    async fn invalid_command_emits_local_red_message() {
        let (supervisor, mut ui_rx) = offline_supervisor();

        supervisor.submit_line("/dance").await;

        let frame = ui_rx.recv().await.expect("a local message");
        assert_eq!(frame.kind, FrameKind::Message);
        assert_eq!(frame.metadata.color, LOCAL_ERROR_COLOR);
        assert!(frame.value_text().contains("/dance"));

        // Nothing went to the DLQ: no frame is emitted for invalid input.
        assert_eq!(supervisor.dlq_free_slots(), DLQ_DEPTH);
    }

    #[tokio::test]
    async fn quit_fires_the_shutdown_latch() {
        let (supervisor, _ui_rx) = offline_supervisor();

        assert!(!supervisor.shutdown_latch().is_fired());
        supervisor.submit_line("/quit").await;
        assert!(supervisor.shutdown_latch().is_fired());
    }

    #[tokio::test]
    async fn empty_lines_do_nothing() {
        let (supervisor, mut ui_rx) = offline_supervisor();

        supervisor.submit_line("   ").await;

        assert!(ui_rx.try_recv().is_err());
        assert_eq!(supervisor.dlq_free_slots(), DLQ_DEPTH);
    }
}
