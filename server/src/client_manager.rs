//! Connection tracking for the game server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Mapping between socket addresses and player accounts
//! - Connection health monitoring and automatic cleanup
//! - Client capacity management
//!
//! Game state lives elsewhere; a client here is only the transport-level
//! handle through which a player is reached.

use log::info;
use shared::UserId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected client bound to one player account
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: u32,
    /// Player this connection speaks for
    pub user_id: UserId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: u32, user_id: UserId, addr: SocketAddr) -> Self {
        Self {
            id,
            user_id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Enforces the server capacity limit and guarantees that each address and
/// each player account is bound to at most one connection.
pub struct ClientManager {
    /// Connected clients indexed by their connection ID
    clients: HashMap<u32, Client>,
    /// Next available connection ID
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection for `user_id`
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    /// Callers are expected to have removed earlier connections of the same
    /// address or player first.
    pub fn add_client(&mut self, addr: SocketAddr, user_id: UserId) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!(
            "Client {} connected from {} as user {}",
            client_id, addr, user_id
        );
        self.clients
            .insert(client_id, Client::new(client_id, user_id, addr));

        Some(client_id)
    }

    /// Removes a client, returning it if it was connected
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} (user {}) disconnected", client.id, client.user_id);
        Some(client)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<&Client> {
        self.clients.values().find(|client| client.addr == addr)
    }

    pub fn find_client_by_user(&self, user_id: UserId) -> Option<&Client> {
        self.clients.values().find(|client| client.user_id == user_id)
    }

    /// Records activity from `addr`, returning the player it belongs to
    pub fn touch(&mut self, addr: SocketAddr) -> Option<UserId> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.last_seen = Instant::now();
        Some(client.user_id)
    }

    pub fn addr_of_user(&self, user_id: UserId) -> Option<SocketAddr> {
        self.find_client_by_user(user_id).map(|client| client.addr)
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed connections so the game can take their players
    /// offline.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Client> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .iter()
            .filter_map(|client_id| self.remove_client(client_id))
            .collect()
    }

    /// Gets all player IDs and their network addresses
    pub fn get_client_addrs(&self) -> Vec<(UserId, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.user_id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
