//! # Room Client Library
//!
//! Terminal client for the room server. It performs the handshake, prints
//! whatever the room broadcasts and sends typed lines back as envelopes.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The connection itself. [`network::RoomClient`] sends the handshake,
//! frames outgoing envelopes and answers the server's heartbeat pings while
//! receiving, so an idle but attentive client is never timed out.
//!
//! ### Input Module (`input`)
//! Parses typed lines: plain text, `/event <payload>` and `/quit`.
//!
//! ### Display Module (`display`)
//! Formats incoming envelopes, presence notices included, as single lines.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::RoomClient;
//! use shared::Handshake;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let hello = Handshake::new("lobby", "u-1", "Ada");
//!     let mut room = RoomClient::connect("127.0.0.1:8080", &hello).await?;
//!
//!     room.send_text("hello everyone").await?;
//!     while let Some(envelope) = room.recv().await? {
//!         println!("{}", client::display::render(&envelope));
//!     }
//!     Ok(())
//! }
//! ```

pub mod display;
pub mod input;
pub mod network;
