use crate::anchors::AnchorBoard;
use crate::controller::PossessionController;
use crate::input::{parse_command, Command, HELP};
use crate::inventory::SlotInventory;
use crate::relay::RelayEvent;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use rand::Rng;
use shared::config::MAX_PACKET_SIZE;
use shared::{ClientConfig, Packet, Pose, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};

/// Headless possession client driven by console commands
pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    connected: bool,

    controller: PossessionController<SlotInventory, Vec<Packet>>,
    anchors: AnchorBoard,
    hand: Pose,

    fake_ping_ms: u64,
    jitter_ms: u64,
    /// Received packets whose simulated delay has elapsed
    delayed_tx: mpsc::UnboundedSender<Packet>,
    delayed_rx: mpsc::UnboundedReceiver<Packet>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        config: ClientConfig,
        fake_ping_ms: u64,
        jitter_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;
        let inventory = SlotInventory::new(config.slot_capacity);
        let (delayed_tx, delayed_rx) = mpsc::unbounded_channel();

        Ok(Client {
            socket: Arc::new(socket),
            server_addr,
            connected: false,
            controller: PossessionController::new(config, inventory, Vec::new()),
            anchors: AnchorBoard::new(),
            hand: Pose::default(),
            fake_ping_ms,
            jitter_ms,
            delayed_tx,
            delayed_rx,
        })
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    /// Simulated one-way latency, with optional jitter
    fn simulated_delay(&self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.fake_ping_ms / 2 + jitter)
    }

    async fn send_now(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends after the simulated delay; each datagram waits on its own task
    /// so jitter can reorder them
    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let delay = self.simulated_delay();
        if delay.is_zero() {
            return self.send_now(packet).await;
        }

        let data = serialize(packet)?;
        let socket = Arc::clone(&self.socket);
        let addr = self.server_addr;
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(e) = socket.send_to(&data, addr).await {
                error!("Error sending delayed packet: {}", e);
            }
        });
        Ok(())
    }

    /// Hands a received packet over once its simulated delay has passed
    fn deliver(&mut self, packet: Packet, receive_time: Instant) {
        let delay = self.simulated_delay();
        if delay.is_zero() {
            self.handle_packet(packet, receive_time);
            return;
        }

        let tx = self.delayed_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(packet);
        });
    }

    /// Sends whatever the controller queued since the last flush
    async fn flush(&mut self) {
        let outbox = std::mem::take(self.controller.link_mut());
        for packet in outbox {
            if let Err(e) = self.send_packet(&packet).await {
                error!("Error sending packet: {}", e);
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet, receive_time: Instant) {
        match &packet {
            Packet::Connected { actor } => {
                self.connected = true;
                self.controller.inventory_mut().set_actor(*actor);
            }
            Packet::Disconnected { .. } => {
                self.connected = false;
                if let Some(actor) = self.controller.actor() {
                    self.anchors.remove_actor(actor);
                }
            }
            _ => {}
        }
        self.controller.handle_packet(&packet, receive_time);
    }

    fn tick(&mut self, now: Instant) {
        if let Some(actor) = self.controller.actor() {
            let anchor = self.controller.config().hand_anchor.clone();
            self.anchors.set(actor, anchor, self.hand);
        }
        self.controller.tick(&self.anchors, now);

        for event in self.controller.drain_relay_events() {
            match event {
                RelayEvent::Delivered { new_id, .. } => info!("Mirror delivered copy {}", new_id),
                RelayEvent::Failed { reason, .. } => warn!("Mirror refused: {:?}", reason),
                RelayEvent::TimedOut { .. } => warn!("Mirror did not answer"),
            }
        }
    }

    /// Applies one console command; returns false to quit
    fn handle_command(&mut self, command: Command, now: Instant) -> bool {
        match command {
            Command::Take(slot) => {
                self.controller.take_from_slot(slot, now);
            }
            Command::Put => {
                self.controller.put_back(now);
            }
            Command::Use => {
                self.controller.use_held_item(now);
            }
            Command::Inspect => {
                if !self.controller.release_for_inspect() {
                    println!("Nothing to inspect");
                }
            }
            Command::Recover => {
                self.controller.recover_from_inspect();
            }
            Command::Select(id) => {
                self.controller.select(id);
            }
            Command::AutoMove { id, target } => {
                self.controller.auto_move(id, Pose::at(target));
            }
            Command::Mirror(group) => {
                if !self.controller.send_to_mirror(&group, now) {
                    println!("Hold an item and wait for the last mirror request first");
                }
            }
            Command::Move(position) => {
                self.hand = Pose::new(position, self.hand.rotation);
            }
            Command::Stash(id) => match self.controller.inventory_mut().add(id) {
                Ok(slot) => println!("Stored {} in slot {}", id, slot),
                Err(e) => println!("{}", e),
            },
            Command::Status => self.print_status(),
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    fn print_status(&self) {
        println!(
            "actor: {:?}, connected: {}",
            self.controller.actor(),
            self.connected
        );
        for (slot, item) in self.controller.inventory().slots().iter().enumerate() {
            match item {
                Some(id) => println!("  slot {}: {}", slot, id),
                None => println!("  slot {}: empty", slot),
            }
        }
        if let Some(held) = self.controller.held() {
            let pose = self.controller.follower().pose(held.id);
            println!("holding {} from slot {} at {:?}", held.id, held.slot, pose);
        }
        if let Some(pending) = self.controller.pending() {
            println!("waiting on {:?} for {}", pending.kind, pending.id);
        }
        if let Some(queued) = self.controller.queued_take() {
            println!("slot {} queued behind an earlier request", queued.slot);
        }
        let mut seen: Vec<_> = self.controller.follower().observations().collect();
        seen.sort_by_key(|(id, _)| **id);
        for (id, observation) in seen {
            if observation.despawned {
                continue;
            }
            let prefab = observation
                .prefab
                .as_ref()
                .map_or("?".to_string(), |p| p.to_string());
            println!(
                "  {} {:<12} owner {:?} gen {}",
                id, prefab, observation.owner, observation.generation
            );
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = interval(Duration::from_millis(16));
        let mut heartbeat_interval = interval(Duration::from_secs(1));
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        let mut buffer = [0u8; MAX_PACKET_SIZE];

        println!("{}", HELP);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    let receive_time = Instant::now();
                    match result {
                        Ok((len, _)) => match deserialize::<Packet>(&buffer[0..len]) {
                            Ok(packet) => self.deliver(packet, receive_time),
                            Err(e) => warn!("Failed to deserialize packet: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                Some(packet) = self.delayed_rx.recv() => {
                    self.handle_packet(packet, Instant::now());
                },

                _ = tick_interval.tick() => {
                    self.tick(Instant::now());
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },

                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) if line.trim().is_empty() => {},
                        Ok(Some(line)) => match parse_command(&line) {
                            Ok(command) => {
                                if !self.handle_command(command, Instant::now()) {
                                    break;
                                }
                            }
                            Err(e) => println!("{} (type 'help')", e),
                        },
                        Ok(None) => stdin_open = false,
                        Err(e) => {
                            error!("Error reading console: {}", e);
                            stdin_open = false;
                        }
                    }
                },
            }

            self.flush().await;
        }

        if self.connected {
            let _ = self.send_now(&Packet::Disconnect).await;
        }

        Ok(())
    }
}
