//! Actor connection management for the possession server
//!
//! This module handles the server-side bookkeeping of connected actors:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Actor id assignment and address lookup
//! - Liveness tracking from heartbeats and regular traffic
//! - Capacity limits
//!
//! Releasing whatever a departed actor was holding is the arbiter's job; the
//! manager only reports which actors are gone.

use log::info;
use shared::ActorId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected actor
#[derive(Debug)]
pub struct Connection {
    /// Actor id assigned by the server
    pub actor: ActorId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this actor
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(actor: ActorId, addr: SocketAddr) -> Self {
        Self {
            actor,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Records activity from this actor
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing has been received within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks every connected actor and enforces the capacity limit
pub struct ClientManager {
    /// Connected actors indexed by id
    clients: HashMap<ActorId, Connection>,
    /// Next id handed out; ids start at 1 and are never reused
    next_actor_id: ActorId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    /// Creates an empty roster with the given capacity and liveness timeout
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_actor_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to add a new connection
    ///
    /// Returns the new actor id, or None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ActorId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let actor = self.next_actor_id;
        self.next_actor_id += 1;

        info!("Actor {} connected from {}", actor, addr);
        self.clients.insert(actor, Connection::new(actor, addr));

        Some(actor)
    }

    /// Removes a connection, returning false if it was already gone
    pub fn remove_client(&mut self, actor: &ActorId) -> bool {
        if let Some(connection) = self.clients.remove(actor) {
            info!("Actor {} disconnected", connection.actor);
            true
        } else {
            false
        }
    }

    /// Finds the actor connected from `addr`
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ActorId> {
        self.clients
            .values()
            .find(|connection| connection.addr == addr)
            .map(|connection| connection.actor)
    }

    /// Marks the actor behind `addr` as alive, returning its id
    pub fn touch(&mut self, addr: SocketAddr) -> Option<ActorId> {
        let connection = self
            .clients
            .values_mut()
            .find(|connection| connection.addr == addr)?;
        connection.touch();
        Some(connection.actor)
    }

    /// Removes and returns every actor silent for longer than the timeout
    pub fn check_timeouts(&mut self) -> Vec<ActorId> {
        let timeout = self.timeout;
        let timed_out: Vec<ActorId> = self
            .clients
            .values()
            .filter(|connection| connection.is_timed_out(timeout))
            .map(|connection| connection.actor)
            .collect();

        for actor in &timed_out {
            self.remove_client(actor);
        }

        timed_out
    }

    /// All actor ids and their addresses, for broadcasting
    pub fn get_client_addrs(&self) -> Vec<(ActorId, SocketAddr)> {
        self.clients
            .values()
            .map(|connection| (connection.actor, connection.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
