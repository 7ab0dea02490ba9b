//! # Room Server Library
//!
//! Lets many independent clients join a named, capacity-bounded room and
//! exchange low-latency framed messages with every other member of that
//! room. Rooms get their broadcast machinery lazily, on first use, and a
//! slow or vanished client never holds up the rest of its room.
//!
//! ## Architecture Design
//!
//! ### Registry (`registry`)
//! A keyed store with atomic get-or-create. Concurrent requests for the same
//! room id converge on one hub, and exactly one of them constructs it.
//!
//! ### Hub (`hub`)
//! Owns the live connections of one room. A single event-loop task drains
//! join, leave and broadcast requests from one queue and applies them in
//! order, so the member set is never shared between tasks and needs no lock.
//! Delivery is a non-blocking enqueue per member: a member whose outbound
//! queue is full is evicted rather than allowed to stall the room.
//!
//! ### Connection (`connection`)
//! Two pumps per member. The reader forwards data frames to the hub and
//! enforces the read deadline; the writer drains the outbound queue, enforces
//! the write deadline and pings the peer every heartbeat period. Any failure
//! on either side becomes a `Leave`, which is idempotent.
//!
//! ### Rooms and accept path (`room`, `listener`)
//! Room metadata comes from a [`room::RoomStore`]. The TCP listener reads a
//! handshake, resolves the room and passes the framed stream to the hub.
//! The hub itself never sees sockets or handshakes.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::HubConfig;
//! use server::connection::UserInfo;
//! use server::registry::HubRegistry;
//! use server::room::Room;
//! use shared::FrameCodec;
//! use tokio_util::codec::Framed;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hubs = HubRegistry::new(HubConfig::default());
//!     let room = Room::new("jam", "Friday Jam", "ada").with_capacity(4);
//!     let hub = room.hub(&hubs);
//!
//!     // Any upgraded byte stream will do; here an in-memory pipe
//!     let (server_side, _client_side) = tokio::io::duplex(64 * 1024);
//!     let transport = Framed::new(server_side, FrameCodec::new());
//!
//!     match hub.join(transport, UserInfo::new("u-1", "Ada")).await {
//!         Ok(connection) => println!("admitted as {}", connection.id()),
//!         Err(rejected) => println!("{}", rejected),
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod listener;
pub mod registry;
pub mod room;

pub use config::HubConfig;
pub use connection::{Connection, ConnectionId, Transport, UserInfo};
pub use error::{JoinRejected, RejectReason, ServerError};
pub use hub::{Hub, MemberInfo};
pub use listener::{Listener, ListenerSettings};
pub use registry::{HubRegistry, Registry};
pub use room::{MemoryRoomStore, Room, RoomId, RoomStore};
