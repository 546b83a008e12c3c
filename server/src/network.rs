//! Server network layer: UDP transport, connection handling and dispatch of
//! possession requests to the arbiter and the mirror relay

use crate::arbiter::{Broadcaster, OwnershipArbiter};
use crate::client_manager::ClientManager;
use crate::mirror::{MirrorGroup, MirrorRelay, RelayOutcome};
use crate::registry::ObjectRegistry;
use crate::world;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::config::MAX_PACKET_SIZE;
use shared::{ActorId, Packet, PossessableId, ServerConfig, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { actor: ActorId },
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
    },
}

/// Broadcaster that queues packets for the network sender task
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<GameMessage>,
}

impl ChannelBroadcaster {
    pub fn new(tx: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self { tx }
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, packet: Packet) {
        if let Err(e) = self.tx.send(GameMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }
}

/// Authoritative possession server
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    arbiter: Arc<OwnershipArbiter<ChannelBroadcaster>>,
    mirrors: MirrorRelay<ChannelBroadcaster>,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    /// Binds `addr` and loads the default world
    pub async fn new(addr: &str, config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Arc::new(ObjectRegistry::new(world::default_catalog()));
        world::populate(&registry)?;
        Self::with_world(addr, config, registry, world::default_mirror_groups()).await
    }

    /// Binds `addr` serving an already populated registry
    pub async fn with_world(
        addr: &str,
        config: ServerConfig,
        registry: Arc<ObjectRegistry>,
        groups: Vec<MirrorGroup>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let arbiter = Arc::new(OwnershipArbiter::new(
            registry,
            ChannelBroadcaster::new(game_tx.clone()),
            (&config).into(),
        ));
        let mut mirrors = MirrorRelay::new(Arc::clone(&arbiter), config.mirror_occupancy_timeout);
        for group in groups {
            mirrors.add_group(group);
        }

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            arbiter,
            mirrors,
            config,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn arbiter(&self) -> &Arc<OwnershipArbiter<ChannelBroadcaster>> {
        &self.arbiter
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (actor, addr) in client_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to actor {}: {}", actor, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors connection liveness
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for actor in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { actor }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn deny(&self, addr: SocketAddr, request_id: u32, id: PossessableId, error: &shared::PossessionError) {
        self.send_packet(
            Packet::Denied {
                request_id,
                id,
                reason: error.reason(),
            },
            addr,
        );
    }

    /// Drops the connection and frees everything the actor held
    async fn disconnect_actor(&self, actor: ActorId) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&actor);
        }
        self.arbiter.release_all(actor);
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Rejecting {}: protocol version {} != {}",
                        addr, client_version, PROTOCOL_VERSION
                    );
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Replace an existing connection from the same address
                let existing = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(existing) = existing {
                    info!("Replacing existing actor {} from {}", existing, addr);
                    self.disconnect_actor(existing).await;
                }

                let actor = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr)
                };

                match actor {
                    Some(actor) => {
                        self.send_packet(Packet::Connected { actor }, addr);
                        // One packet per record keeps every datagram small
                        for record in self.arbiter.snapshot() {
                            self.send_packet(Packet::RecordSync { record }, addr);
                        }
                    }
                    None => {
                        self.send_packet(
                            Packet::Disconnected {
                                reason: "Server full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Heartbeat => {
                let mut clients = self.clients.write().await;
                if clients.touch(addr).is_none() {
                    debug!("Heartbeat from unknown address {}", addr);
                }
            }

            Packet::Disconnect => {
                let actor = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(actor) = actor {
                    self.disconnect_actor(actor).await;
                }
            }

            Packet::RequestPossession { .. }
            | Packet::ReleasePossession { .. }
            | Packet::AttachToAnchor { .. }
            | Packet::ReservePossession { .. }
            | Packet::Relocate { .. }
            | Packet::SendToMirror { .. } => {
                let actor = {
                    let mut clients = self.clients.write().await;
                    clients.touch(addr)
                };

                let Some(actor) = actor else {
                    warn!("Possession packet from unconnected address {}", addr);
                    return;
                };

                if let Some(claimed) = packet.claimed_actor() {
                    if claimed != actor {
                        warn!(
                            "Dropping packet from actor {} claiming to be actor {}",
                            actor, claimed
                        );
                        return;
                    }
                }

                self.handle_possession(actor, packet, addr);
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Routes a validated possession packet; refusals go to the requester only
    fn handle_possession(&mut self, actor: ActorId, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::RequestPossession { request_id, id, .. } => {
                if let Err(e) = self.arbiter.request_possession(request_id, id, actor) {
                    self.deny(addr, request_id, id, &e);
                }
            }

            Packet::ReleasePossession {
                request_id,
                id,
                consume,
                ..
            } => match self.arbiter.release_possession(request_id, id, actor, consume) {
                Ok(ack) => {
                    self.send_packet(
                        Packet::Ack {
                            request_id,
                            id,
                            generation: ack.generation,
                        },
                        addr,
                    );
                    if ack.consumed {
                        self.mirrors.on_consumed(id);
                    }
                }
                Err(e) => self.deny(addr, request_id, id, &e),
            },

            Packet::AttachToAnchor {
                id, anchor, params, ..
            } => {
                if let Err(e) = self.arbiter.attach_to_anchor(id, actor, anchor, params) {
                    self.deny(addr, 0, id, &e);
                }
            }

            Packet::ReservePossession { id, .. } => {
                if let Err(e) = self.arbiter.reserve_possession(id, actor, Instant::now()) {
                    self.deny(addr, 0, id, &e);
                }
            }

            Packet::Relocate { id, pose, .. } => {
                if let Err(e) = self.arbiter.relocate(id, actor, pose) {
                    self.deny(addr, 0, id, &e);
                }
            }

            Packet::SendToMirror {
                request_id,
                source,
                group,
            } => match self
                .mirrors
                .send_item(actor, request_id, source, &group, Instant::now())
            {
                RelayOutcome::Spawned(new_id) => {
                    let generation = self
                        .arbiter
                        .registry()
                        .lookup(new_id)
                        .map_or(1, |record| record.generation);
                    self.send_packet(
                        Packet::Ack {
                            request_id,
                            id: new_id,
                            generation,
                        },
                        addr,
                    );
                }
                RelayOutcome::Rejected(e) => self.deny(addr, request_id, source, &e),
                RelayOutcome::Dropped => {}
            },

            other => debug!("Ignoring {:?} from actor {}", other, actor),
        }
    }

    /// Expires reservations and frees stale mirror groups
    fn maintain(&mut self, now: Instant) {
        self.arbiter.expire_reservations(now);
        self.mirrors.sweep(now);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.config.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { actor }) => {
                            warn!("Actor {} timed out", actor);
                            self.arbiter.release_all(actor);
                        },
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.maintain(Instant::now());
                },
            }
        }

        Ok(())
    }
}
