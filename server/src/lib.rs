//! # Factory Wars Server Library
//!
//! Authoritative server for a location-based team strategy game. Players walk
//! the real world, discover factories, feed them materials, upgrade them,
//! attack rival teams' factories and trade goods at player-run shops.
//!
//! ## Core Responsibilities
//!
//! ### Live State
//! Persistent documents (users, factories, shops) are wrapped in live objects
//! that hold everything the server only needs while running: who is online,
//! where they stand and what each player was last told. Every mutation is
//! written straight back to the document store.
//!
//! ### Reconciliation
//! Instead of broadcasting full snapshots, the server reconciles every online
//! player against every live object once per tick. A live object remembers
//! the revision and derived flags (in range, allied, pinged) last reported to
//! each player and only emits an update when one of them changed.
//!
//! ### Client Management
//! Handles the lifecycle of client connections including:
//! - Binding a socket address to a player account
//! - Replacing stale sessions when a player logs in again
//! - Disconnection handling and timeout cleanup
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All game-state mutations happen on one event loop. Network receive, send
//! and timeout detection run as separate tasks that only exchange messages
//! with the loop, so ticks, attacks, trades and pings never interleave.
//!
//! ### UDP-Based Communication
//! Packets are bincode-encoded datagrams. Lost state updates are harmless:
//! the next change is reported with the full object view.
//!
//! ## Module Organization
//!
//! - `config`: game balance values, loadable from JSON
//! - `store`: document types and the persistent store backends
//! - `live_user`, `live_factory`, `live_shop`: the live wrappers
//! - `game`: the game state owning all live objects, ticks and sync
//! - `handlers`: mapping client packets onto game actions
//! - `client_manager`: connection bookkeeping
//! - `network`: the UDP server loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::GameConfig;
//! use server::game::{unix_millis, GameState};
//! use server::network::Server;
//! use server::store::{MemoryStore, WorldDocument};
//! use shared::Location;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let now = unix_millis();
//!     let world = WorldDocument::demo(Location::new(52.52, 13.405), now);
//!     let game = GameState::new(Box::new(MemoryStore::new(world)), GameConfig::default(), now)?;
//!
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(100),
//!         64,
//!         Duration::from_secs(30),
//!         game,
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod handlers;
pub mod live_factory;
pub mod live_shop;
pub mod live_user;
pub mod network;
pub mod store;
