//! Sealwire relay server.
//!
//! Accepts WebSocket upgrades on `/ws`, assigns each connection an identity
//! (user id, unique username, color), performs the server leg of the KEM
//! handshake, and relays chat between rooms. The server decrypts each inbound
//! chat payload under the sender's per-connection key and re-encrypts it
//! under every recipient's own key; ciphertext is never forwarded verbatim
//! because no two connections share a key.
//!
//! # Architecture
//!
//! - [`Registry`]: three flat maps (rooms, connections, used usernames)
//!   guarded by one read/write mutex. All membership observations are
//!   linearized through it.
//! - [`Server`]: accept loop; one handler task per connection runs the read
//!   loop and dispatch.
//! - identity: fixed name dictionary and color palette for assignment.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hub;
mod identity;
mod registry;

pub use error::HubError;
pub use hub::{Server, ServerConfig};
pub use identity::{random_color, random_username};
pub use registry::{Registry, RegistryError, Room};
