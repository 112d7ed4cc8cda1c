use std::collections::HashMap;
use std::net::SocketAddr;

use super::{
    ConnectionError, ConnectionFailedReason, ConnectionPipeline, PendingConnection,
    PendingConnectionState,
};
use crate::error::NetError;
use crate::message::{MessageFactory, MessageType};
use crate::packet::NetworkPacket;
use crate::socket::DatagramSocket;

/// Denied connections kept for polling; older entries are dropped first.
pub const MAX_DENIED_CONNECTIONS: usize = 64;

/// A handshake that ended in failure, kept until the owner polls it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeniedConnection {
    pub address: SocketAddr,
    pub reason: ConnectionFailedReason,
}

/// Owns every unverified handshake, keyed by remote address, and drives them
/// through the pipeline `P`.
#[derive(Debug)]
pub struct PendingConnectionsManager<P> {
    pipeline: P,
    connections: HashMap<SocketAddr, PendingConnection>,
    denied: Vec<DeniedConnection>,
    max_pending_connections: usize,
    connection_timeout: f32,
    allow_local_connections: bool,
    mtu: usize,
}

impl<P: ConnectionPipeline> PendingConnectionsManager<P> {
    pub fn new(
        pipeline: P,
        max_pending_connections: usize,
        connection_timeout: f32,
        allow_local_connections: bool,
        mtu: usize,
    ) -> Self {
        Self {
            pipeline,
            connections: HashMap::new(),
            denied: Vec::new(),
            max_pending_connections,
            connection_timeout,
            allow_local_connections,
            mtu,
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, address: SocketAddr) -> bool {
        self.connections.contains_key(&address)
    }

    pub fn get(&self, address: SocketAddr) -> Option<&PendingConnection> {
        self.connections.get(&address)
    }

    /// Starts a handshake initiated by this endpoint.
    pub fn start_connecting_to(&mut self, address: SocketAddr) -> Result<(), ConnectionError> {
        if !self.allow_local_connections {
            return Err(ConnectionError::LocalConnectionsNotAllowed(address));
        }
        if self.connections.contains_key(&address) {
            return Err(ConnectionError::AlreadyPending(address));
        }
        if self.connections.len() >= self.max_pending_connections {
            return Err(ConnectionError::TooManyPendingConnections);
        }

        self.connections
            .insert(address, PendingConnection::new(address, self.mtu));
        Ok(())
    }

    /// Feeds a packet from an unverified address into its handshake, creating
    /// one when the packet opens with a ConnectionRequest and this side
    /// accepts incoming connections. `free_peer_slots` is the room left in
    /// the remote peer table; when no room remains the handshake is denied
    /// with `ServerFull`.
    pub fn process_packet(
        &mut self,
        address: SocketAddr,
        mut packet: NetworkPacket,
        factory: &mut MessageFactory,
        free_peer_slots: usize,
    ) {
        let messages = packet.take_messages();

        if !self.connections.contains_key(&address) {
            let is_request = messages
                .iter()
                .any(|m| m.message_type() == MessageType::ConnectionRequest);
            if !is_request || !self.pipeline.accepts_incoming_connections() {
                log::debug!("Ignoring packet from unknown address {}", address);
                factory.release_all(messages);
                return;
            }
            if self.connections.len() >= self.max_pending_connections {
                log::warn!(
                    "Too many pending connections, dropping request from {}",
                    address
                );
                factory.release_all(messages);
                return;
            }
            log::info!("Connection request from {}", address);
            self.connections
                .insert(address, PendingConnection::new(address, self.mtu));
        }

        let reserved = self
            .connections
            .values()
            .filter(|c| c.state() == PendingConnectionState::Completed)
            .count();
        let server_full = free_peer_slots <= reserved;

        let Some(connection) = self.connections.get_mut(&address) else {
            factory.release_all(messages);
            return;
        };

        for message in messages {
            let claims_slot = matches!(
                (message.message_type(), connection.state()),
                (MessageType::ConnectionRequest, PendingConnectionState::Initializing)
                    | (
                        MessageType::ConnectionChallengeResponse,
                        PendingConnectionState::ConnectionChallenge
                    )
            );

            if server_full && claims_slot && self.pipeline.accepts_incoming_connections() {
                connection.fail(ConnectionFailedReason::ServerFull);
                connection.send_denied(ConnectionFailedReason::ServerFull, factory);
            } else {
                self.pipeline
                    .process_connection_message(connection, &message, factory);
            }
            factory.release_message(message);
        }
    }

    /// Advances every handshake and fails those older than the timeout.
    pub fn update(&mut self, dt: f32, factory: &mut MessageFactory) {
        for connection in self.connections.values_mut() {
            if connection.is_finished() {
                continue;
            }
            connection.advance(dt);
            if connection.elapsed() >= self.connection_timeout {
                connection.fail(ConnectionFailedReason::Timeout);
                continue;
            }
            self.pipeline.update(connection, dt, factory);
        }
    }

    pub fn send_data(
        &mut self,
        socket: &mut dyn DatagramSocket,
        factory: &mut MessageFactory,
    ) -> Result<(), NetError> {
        for connection in self.connections.values_mut() {
            connection.send_data(socket, factory)?;
        }
        Ok(())
    }

    /// Removes and returns every completed handshake. Each one is handed out
    /// exactly once.
    pub fn take_completed_connections(&mut self) -> Vec<PendingConnection> {
        let addresses: Vec<SocketAddr> = self
            .connections
            .iter()
            .filter(|(_, c)| c.state() == PendingConnectionState::Completed)
            .map(|(&address, _)| address)
            .collect();

        addresses
            .into_iter()
            .filter_map(|address| self.connections.remove(&address))
            .collect()
    }

    /// Drops failed handshakes, recording them as denied connections. Returns
    /// the ones removed by this call.
    pub fn remove_failed_connections(
        &mut self,
        factory: &mut MessageFactory,
    ) -> Vec<DeniedConnection> {
        let mut removed = Vec::new();
        self.connections.retain(|&address, connection| {
            if connection.state() != PendingConnectionState::Failed {
                return true;
            }
            removed.push(DeniedConnection {
                address,
                reason: connection.failed_reason(),
            });
            connection.reset(factory);
            false
        });

        self.denied.extend_from_slice(&removed);
        if self.denied.len() > MAX_DENIED_CONNECTIONS {
            let excess = self.denied.len() - MAX_DENIED_CONNECTIONS;
            self.denied.drain(..excess);
        }
        removed
    }

    pub fn denied_connections(&self) -> &[DeniedConnection] {
        &self.denied
    }

    pub fn take_denied_connections(&mut self) -> Vec<DeniedConnection> {
        std::mem::take(&mut self.denied)
    }

    pub fn remove(&mut self, address: SocketAddr, factory: &mut MessageFactory) {
        if let Some(mut connection) = self.connections.remove(&address) {
            connection.reset(factory);
        }
    }

    pub fn clear(&mut self, factory: &mut MessageFactory) {
        for (_, mut connection) in self.connections.drain() {
            connection.reset(factory);
        }
    }
}
