//! # World Server Library
//!
//! This library implements the authoritative core of a real-time multiplayer
//! world server. It owns the canonical game state, advances it on a fixed
//! simulation step, and exchanges binary messages with connected clients
//! over WebSockets.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the definitive version of the world. All game logic
//! decisions happen here; clients only send intents and receive state
//! updates. Simulation advances in fixed 8 ms steps driven by a wall-clock
//! accumulator, with a separate interpolating render pass producing the
//! outbound state stream.
//!
//! ### Connection Management
//! A single hub control loop owns the connection registry and processes
//! connects, disconnects, inbound messages, and outbound deliveries in
//! strict series. Each connection runs a read pump and a write pump; slow
//! consumers are evicted rather than allowed to stall the rest.
//!
//! ### Spatial Queries
//! Entities with collision bounds live in a spatial index supporting
//! rectangle queries, optionally filtered by type flags, so game logic can
//! ask "what is here" without scanning every object.
//!
//! ## Module Organization
//!
//! - [`spatial`]: the spatial index and entity type flags
//! - [`world`]: world bounds, spawn positions, and the transport block grid
//! - [`game`]: the entity registry, the fixed-step simulation loop, and the
//!   scheduling task driving it
//! - [`player`]: the player game object backing each connection
//! - [`hub`]: the connection hub and its event channels
//! - [`client`]: per-connection read and write pumps
//! - [`network`]: the WebSocket listener and origin-checked upgrade
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::{Game, Simulation};
//! use server::hub::Hub;
//! use server::network::Listener;
//! use server::world::World;
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let world = World::new(512.0, 512.0, 4);
//!     let game = Arc::new(RwLock::new(Game::new(world)));
//!
//!     let (hub, handle) = Hub::new(Arc::clone(&game));
//!     tokio::spawn(hub.run());
//!
//!     let mut simulation = Simulation::new(game);
//!     simulation.start(60, handle.outbound_sender());
//!
//!     let listener = Listener::bind("127.0.0.1:8080", "http://localhost:8080".into()).await?;
//!     listener.serve(handle).await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod game;
pub mod hub;
pub mod network;
pub mod player;
pub mod spatial;
pub mod world;
