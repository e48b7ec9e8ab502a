//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::game::{unix_millis, GameState, Outbound};
use crate::handlers::{rejection, Action};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, UserId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    /// `connection` is the id of the connection that expired
    ClientTimeout { user_id: UserId, connection: u32 },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    SendToUser { packet: Packet, user_id: UserId },
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game: GameState,
    tick_duration: Duration,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        client_timeout: Duration,
        game: GameState,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game,
            tick_duration,
            client_timeout,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that can stop the server loop with [`ServerMessage::Shutdown`]
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

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
    fn spawn_network_sender(&mut self) {
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
                    GameMessage::SendToUser { packet, user_id } => {
                        let addr = clients.read().await.addr_of_user(user_id);
                        match addr {
                            Some(addr) => {
                                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await
                                {
                                    error!("Failed to send to user {}: {}", user_id, e);
                                }
                            }
                            None => debug!("Dropping packet for disconnected user {}", user_id),
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts(timeout);

                for client in timed_out {
                    let message = ServerMessage::ClientTimeout {
                        user_id: client.user_id,
                        connection: client.id,
                    };
                    if let Err(e) = server_tx.send(message) {
                        error!("Failed to send timeout message: {}", e);
                        return;
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

    fn send_outbound(&self, outbound: Outbound) {
        for (user_id, packet) in outbound {
            if let Err(e) = self.game_tx.send(GameMessage::SendToUser { packet, user_id }) {
                error!("Failed to queue packet for user {}: {}", user_id, e);
                return;
            }
        }
    }

    /// Drops the connection bound to `addr` and the one bound to `user_id`,
    /// telling a displaced session why it was closed.
    async fn release_existing(&mut self, addr: SocketAddr, user_id: UserId) {
        let (by_addr, by_user) = {
            let clients = self.clients.read().await;
            (
                clients.find_client_by_addr(addr).map(|c| (c.id, c.user_id)),
                clients
                    .find_client_by_user(user_id)
                    .map(|c| (c.id, c.addr)),
            )
        };

        if let Some((client_id, old_user)) = by_addr {
            info!("Replacing connection {} from {}", client_id, addr);
            self.clients.write().await.remove_client(&client_id);
            self.game.disconnect(old_user);
        }

        if let Some((client_id, old_addr)) = by_user {
            if old_addr != addr {
                info!("User {} logged in from {}, closing {}", user_id, addr, old_addr);
                self.clients.write().await.remove_client(&client_id);
                self.game.disconnect(user_id);
                self.send_packet(
                    Packet::Disconnected {
                        reason: "Logged in elsewhere".to_string(),
                    },
                    old_addr,
                );
            }
        }
    }

    /// Takes a timed out player offline unless they already reconnected on a
    /// newer connection.
    async fn handle_timeout(&mut self, user_id: UserId, connection: u32) {
        let current = self
            .clients
            .read()
            .await
            .find_client_by_user(user_id)
            .map(|c| c.id);

        match current {
            Some(id) if id != connection => {
                debug!(
                    "Ignoring timeout of connection {} for user {}, now on {}",
                    connection, user_id, id
                );
            }
            _ => {
                info!("User {} timed out", user_id);
                self.game.disconnect(user_id);
            }
        }
    }

    /// Tells every connected client the server is going away. Sends directly
    /// so the notice is out before the runtime stops.
    async fn notify_shutdown(&mut self) {
        let packet = Packet::Disconnected {
            reason: "Server shutting down".to_string(),
        };
        let client_addrs = self.clients.read().await.get_client_addrs();
        for (user_id, addr) in client_addrs {
            if let Err(e) = Self::send_packet_impl(&self.socket, &packet, addr).await {
                error!("Failed to notify user {} of shutdown: {}", user_id, e);
            }
        }
        if let Err(e) = self.game.flush_dirty() {
            error!("Failed to persist world on shutdown: {}", e);
        }
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if !packet.is_client_packet() {
            warn!("Dropping server-side packet sent by {}", addr);
            return;
        }

        match packet {
            Packet::Connect {
                client_version,
                user_id,
            } => {
                info!(
                    "Client connecting from {} as user {} (version: {})",
                    addr, user_id, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_packet(response, addr);
                    return;
                }

                self.release_existing(addr, user_id).await;

                let client_id = self.clients.write().await.add_client(addr, user_id);
                if client_id.is_none() {
                    let response = Packet::Disconnected {
                        reason: "Server full".to_string(),
                    };
                    self.send_packet(response, addr);
                    return;
                }

                match self.game.connect(user_id) {
                    Ok(outbound) => self.send_outbound(outbound),
                    Err(e) => {
                        if let Some(client_id) = client_id {
                            self.clients.write().await.remove_client(&client_id);
                        }
                        self.send_packet(
                            Packet::Disconnected {
                                reason: e.to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Heartbeat => {
                self.clients.write().await.touch(addr);
            }

            Packet::Disconnect => {
                let client = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr).map(|c| c.id)
                };

                if let Some(client_id) = client {
                    if let Some(client) = self.clients.write().await.remove_client(&client_id) {
                        self.game.disconnect(client.user_id);
                    }
                }
            }

            packet => {
                let Some(action) = Action::from_packet(&packet) else {
                    warn!("Unexpected packet type from client at {}", addr);
                    return;
                };

                let Some(user_id) = self.clients.write().await.touch(addr) else {
                    debug!("Ignoring action from unconnected address {}", addr);
                    return;
                };

                match self.game.handle(user_id, action, unix_millis()) {
                    Ok(outbound) => self.send_outbound(outbound),
                    Err(e) => {
                        debug!("Rejected action from user {}: {}", user_id, e);
                        self.send_packet(rejection(&e), addr);
                    }
                }
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { user_id, connection }) => {
                            self.handle_timeout(user_id, connection).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            self.notify_shutdown().await;
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let now = unix_millis();
                    let outbound = self.game.tick(now);
                    self.send_outbound(outbound);
                    let updates = self.game.sync(now);
                    self.send_outbound(updates);

                    // Periodic monitoring
                    if self.game.tick % 100 == 0 {
                        let client_count = self.clients.read().await.len();
                        if client_count > 0 {
                            debug!("Tick {}: {} clients", self.game.tick, client_count);
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
