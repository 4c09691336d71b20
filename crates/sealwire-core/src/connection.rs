//! One socket, one writer, one reader.
//!
//! The write side of the socket is owned by a single writer task that drains
//! a bounded queue; callers enqueue a request and wait on a reply channel.
//! Exactly one writer eliminates any need for a write mutex and guarantees
//! per-connection FIFO order. The read side is touched only through
//! [`Connection::read`], which refreshes the read deadline on every attempt.

use std::{
    pin::Pin,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use sealwire_crypto::SymmetricKey;
use sealwire_proto::WsMetadata;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};
use tokio_util::sync::CancellationToken;

use crate::{error::ConnectionError, latch::Latch};

/// Interval between client-issued liveness pings.
pub const PING_PERIOD: Duration = Duration::from_secs(5);

/// Read deadline. Slides forward on every read attempt and every pong.
/// Must stay above [`PING_PERIOD`], otherwise the deadline fires before the
/// next ping can elicit a pong.
pub const PONG_WAIT: Duration = Duration::from_secs(10);

/// Deadline for a single socket write.
pub const WRITE_WAIT: Duration = Duration::from_secs(5);

/// Writer queue capacity. A slow peer fills the queue and blocks callers of
/// [`Connection::send`] rather than dropping frames.
pub const WRITE_QUEUE_DEPTH: usize = 10;

/// What flavor of WebSocket message a write request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// UTF-8 JSON envelope.
    Text,
    /// Native ping control frame.
    Ping,
    /// Native pong control frame.
    Pong,
    /// Close frame.
    Close,
}

/// One entry in the writer queue.
struct WriteRequest {
    kind: WriteKind,
    bytes: Vec<u8>,
    reply: oneshot::Sender<Result<(), ConnectionError>>,
}

type BoxedReader = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// One live socket plus its key material, metadata, write queue, and latches.
///
/// The KEM decapsulation key is NOT here: it belongs to the client supervisor
/// because it outlives any single connection. The derived symmetric secret
/// does live here; it exists only after the handshake and dies with the
/// connection.
pub struct Connection {
    metadata: StdMutex<WsMetadata>,
    key: StdMutex<Option<SymmetricKey>>,
    write_tx: mpsc::Sender<WriteRequest>,
    reader: TokioMutex<BoxedReader>,
    writer_ready: Latch,
    writer_closed: Latch,
    keys_exchanged: Latch,
    shutdown: CancellationToken,
}

impl Connection {
    /// Wrap a split socket and start the writer loop.
    ///
    /// The returned connection is usable for [`send`](Self::send) once the
    /// `writer_ready` latch fires, which the writer does as its first act.
    pub fn start<S, R>(
        sink: S,
        stream: R,
        metadata: WsMetadata,
        shutdown: CancellationToken,
    ) -> Arc<Self>
    where
        S: Sink<Message> + Send + Unpin + 'static,
        S::Error: std::fmt::Display,
        R: Stream<Item = Result<Message, WsError>> + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);

        let connection = Arc::new(Self {
            metadata: StdMutex::new(metadata),
            key: StdMutex::new(None),
            write_tx,
            reader: TokioMutex::new(Box::pin(stream)),
            writer_ready: Latch::new(),
            writer_closed: Latch::new(),
            keys_exchanged: Latch::new(),
            shutdown,
        });

        tokio::spawn(write_loop(
            sink,
            write_rx,
            connection.writer_ready.clone(),
            connection.writer_closed.clone(),
            connection.shutdown.clone(),
        ));

        connection
    }

    /// Enqueue bytes for the writer and wait for the write result.
    ///
    /// Two-phase select: can the letter be handed to the courier at all, and
    /// will the courier ever reply? Both phases bail out if the writer has
    /// closed, so no caller blocks past connection teardown.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Closed` if the writer exited at either phase
    /// - the writer's own error (transport failure, write timeout) otherwise
    pub async fn send(&self, bytes: Vec<u8>, kind: WriteKind) -> Result<(), ConnectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = WriteRequest { kind, bytes, reply: reply_tx };

        tokio::select! {
            enqueued = self.write_tx.send(request) => {
                if enqueued.is_err() {
                    return Err(ConnectionError::Closed);
                }
            },
            () = self.writer_closed.fired() => return Err(ConnectionError::Closed),
        }

        tokio::select! {
            reply = reply_rx => reply.unwrap_or(Err(ConnectionError::Closed)),
            () = self.writer_closed.fired() => Err(ConnectionError::Closed),
        }
    }

    /// Read the next text frame's bytes. The caller decodes.
    ///
    /// A fresh [`PONG_WAIT`] deadline applies to every attempt. Control
    /// frames are handled inline: pings are answered through the writer
    /// queue, pongs just slide the deadline. Binary frames are not part of
    /// the protocol and are skipped.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::ReadTimeout` if nothing arrives within the deadline
    /// - `ConnectionError::Closed` on a close frame or stream end
    /// - `ConnectionError::Transport` on socket failure
    pub async fn read(&self) -> Result<Vec<u8>, ConnectionError> {
        let mut reader = self.reader.lock().await;

        loop {
            let next = tokio::time::timeout(PONG_WAIT, reader.next())
                .await
                .map_err(|_| ConnectionError::ReadTimeout(PONG_WAIT))?;

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Ping(payload))) => {
                    self.send(payload, WriteKind::Pong).await?;
                },
                Some(Ok(Message::Pong(_))) => {},
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Ok(other)) => {
                    tracing::debug!(kind = ?other, "skipping non-protocol frame");
                },
                Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
            }
        }
    }

    /// Snapshot of the sender metadata.
    pub fn metadata(&self) -> WsMetadata {
        self.metadata.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the sender metadata.
    pub fn set_metadata(&self, metadata: WsMetadata) {
        *self.metadata.lock().unwrap_or_else(PoisonError::into_inner) = metadata;
    }

    /// Update only the current room.
    pub fn set_current_room(&self, room_id: &str) {
        self.metadata.lock().unwrap_or_else(PoisonError::into_inner).current_room_id =
            room_id.to_string();
    }

    /// The derived symmetric key, if the handshake has completed.
    pub fn symmetric_key(&self) -> Option<SymmetricKey> {
        self.key.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Store the derived key and latch `keys_exchanged`.
    pub fn set_symmetric_key(&self, key: SymmetricKey) {
        *self.key.lock().unwrap_or_else(PoisonError::into_inner) = Some(key);
        self.keys_exchanged.fire();
    }

    /// Fires when the writer loop has entered its drain loop.
    pub fn writer_ready(&self) -> &Latch {
        &self.writer_ready
    }

    /// Fires when the writer loop exits; terminal for the connection.
    pub fn writer_closed(&self) -> &Latch {
        &self.writer_closed
    }

    /// Fires once the symmetric key is established.
    pub fn keys_exchanged(&self) -> &Latch {
        &self.keys_exchanged
    }

    /// Cancellation token shared by every task spawned for this connection.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Cancel every task tied to this connection. The writer exits at its
    /// next loop turn, the ping task at its next tick, the reader after its
    /// next socket error or deadline.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("metadata", &self.metadata())
            .field("keys_exchanged", &self.keys_exchanged.is_fired())
            .field("writer_closed", &self.writer_closed.is_fired())
            .finish()
    }
}

/// The single task allowed to touch the socket's write side.
///
/// Drains the queue, applies the write deadline, and delivers each result to
/// the caller's reply channel. Exits on cancellation, queue closure, or the
/// first write failure; fires `writer_closed` on the way out so blocked
/// senders unstick.
async fn write_loop<S>(
    mut sink: S,
    mut requests: mpsc::Receiver<WriteRequest>,
    ready: Latch,
    closed: Latch,
    shutdown: CancellationToken,
) where
    S: Sink<Message> + Send + Unpin,
    S::Error: std::fmt::Display,
{
    ready.fire();

    loop {
        let request = tokio::select! {
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
            () = shutdown.cancelled() => {
                tracing::debug!("writer loop cancelled");
                break;
            },
        };

        let message = match request.kind {
            WriteKind::Text => Message::Text(String::from_utf8_lossy(&request.bytes).into_owned()),
            WriteKind::Ping => Message::Ping(request.bytes),
            WriteKind::Pong => Message::Pong(request.bytes),
            WriteKind::Close => Message::Close(None),
        };

        let result = match tokio::time::timeout(WRITE_WAIT, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout(WRITE_WAIT)),
        };
        let failed = result.is_err();

        // The caller may have given up (cancellation); a dead reply channel
        // is not our problem.
        let _ = request.reply.send(result);

        if failed {
            tracing::debug!("write failed, writer loop exiting");
            break;
        }
    }

    closed.fire();
}
