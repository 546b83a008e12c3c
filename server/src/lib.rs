//! # Possession Server Library
//!
//! This library provides the authoritative side of the possession protocol.
//! It owns every possession record in the session, decides who may hold which
//! possessable, and tells every connected client about each decision.
//!
//! ## Core Responsibilities
//!
//! ### Arbitration
//! Concurrent pickup requests for the same possessable are resolved in the
//! order the server processes them: the first wins, every later request is
//! refused with `AlreadyHeld` until the owner releases. Requests for
//! different possessables never wait on each other.
//!
//! ### Broadcasting
//! Every accepted transition is broadcast to all clients together with the
//! record's new generation. Refusals go only to the requester.
//!
//! ### Connection Management
//! Actors get their id on connect. When an actor disconnects or falls silent
//! for longer than the client timeout, everything it held or reserved is
//! returned to `Free`.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The record store and the prefab catalog used to spawn copies.
//!
//! ### Arbiter Module (`arbiter`)
//! `OwnershipArbiter`: request, release, attach, reserve, relocate and
//! duplicate operations, each validated and applied under the record's lock.
//!
//! ### Mirror Module (`mirror`)
//! `MirrorRelay`: linked mirror groups that receive copies of a held item,
//! with per-request idempotency and occupancy tracking.
//!
//! ### Network Module (`network`)
//! UDP transport, the receive/send/timeout tasks and packet dispatch.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Loads the default world and listens for actors
//!     let mut server = Server::new("127.0.0.1:8080", ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod arbiter;
pub mod client_manager;
pub mod mirror;
pub mod network;
pub mod registry;
pub mod world;
