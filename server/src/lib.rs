//! # Tag Relay Server Library
//!
//! This library implements the relay server for a multiplayer proximity tag
//! game. Clients stream their own position; the server relays positions to
//! every other player and keeps track of a single piece of shared state:
//! which player is currently "It".
//!
//! ## Core Responsibilities
//!
//! ### Position Relay
//! Each position a client reports is forwarded to every other connected
//! player, skipping recipients who already have that exact position. Players
//! stay invisible until they report their first position.
//!
//! ### Tag State
//! The server makes sure exactly one connected player is It:
//! - The first player to join starts as It
//! - It passes to whoever comes within range of the It player
//! - If the It player disconnects, a failsafe eventually picks a new one
//!
//! ### Late Join Sync
//! A connecting client immediately receives the position of every visible
//! player and who is currently It.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Every connection gets its own session task (reading frames) and writer
//! task (draining an unbounded outbox onto the socket). Two long-lived
//! background tasks run the proximity scanner and the failsafe.
//!
//! ### Two Locks
//! All tasks share one [`context::ServerContext`]. Players and the dedup
//! cache sit behind the registry lock; tag bookkeeping sits behind the tag
//! lock. The tag lock is always taken first, which rules out lock cycles.
//!
//! ### Text Protocol
//! Newline-delimited JSON over TCP. See the `shared` crate for the message
//! shapes.
//!
//! ## Module Organization
//!
//! - `registry`: connected players, ID assignment, dedup cache
//! - `broadcast`: position, leave, initial-state and tag fan-out
//! - `tag`: proximity detection, failsafe assignment, background loops
//! - `context`: the shared state object and its critical sections
//! - `framing`: bounded newline framing of the inbound byte stream
//! - `session`: per-connection lifecycle
//! - `network`: listener, accept loop and task supervision
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Accepts clients and runs the tag tasks until the process exits
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod context;
pub mod error;
pub mod framing;
pub mod network;
pub mod registry;
pub mod session;
pub mod tag;
