//! # Possession Client Library
//!
//! Client-side half of the possession protocol: everything a participant
//! needs to ask the server for objects, carry them around on an anchor, and
//! hand them back.
//!
//! ## Architecture Overview
//!
//! The server is the only authority on who holds what. The client never
//! assumes a request will succeed; it sends the request, keeps rendering the
//! last state it was told about, and reacts when the answer arrives.
//!
//! ### Verified Following
//! An attach broadcast that names the local actor does not by itself move
//! the object. The [`follower::AttachmentFollower`] first checks that it has
//! seen the grant which started the ownership. Only then is the object's pose
//! driven from the anchor every tick. If the grant never shows up, the
//! configured [`shared::TimeoutPolicy`] decides between handing the object
//! back and following anyway.
//!
//! ### Generations
//! Every broadcast carries the record's generation. Anything not newer than
//! what the follower already holds is dropped, so reordered or duplicated
//! datagrams cannot roll state back.
//!
//! ## Module Organization
//!
//! - `follower`: per-record projections and anchor bindings
//! - `controller`: actor-facing API (take, put back, use, inspect, select,
//!   auto-move, mirror) and request bookkeeping
//! - `relay`: request tracking for the mirror duplication flow
//! - `inventory`: the [`inventory::InventoryBridge`] collaborator and a
//!   fixed-capacity slot implementation
//! - `anchors`: where each actor's anchors currently are
//! - `input`: console command parsing
//! - `network`: UDP transport and the main `select!` loop
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::controller::PossessionController;
//! use client::inventory::SlotInventory;
//! use shared::{ClientConfig, Packet, PossessableId};
//! use std::time::Instant;
//!
//! let mut inventory = SlotInventory::new(4);
//! inventory.add(PossessableId(1)).unwrap();
//!
//! let mut controller = PossessionController::new(ClientConfig::default(), inventory, Vec::new());
//! controller.handle_packet(&Packet::Connected { actor: 1 }, Instant::now());
//! controller.take_from_slot(0, Instant::now());
//!
//! // Queued packets are flushed to the server by the network loop
//! let outbox: Vec<Packet> = std::mem::take(controller.link_mut());
//! assert_eq!(outbox.len(), 1);
//! ```

pub mod anchors;
pub mod controller;
pub mod follower;
pub mod input;
pub mod inventory;
pub mod network;
pub mod relay;
