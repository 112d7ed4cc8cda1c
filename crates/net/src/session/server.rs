use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use glam::Vec3;

use super::{DisconnectReason, ServerEvent, parse_packet, send_disconnection};
use crate::config::NetworkConfig;
use crate::connection::{
    ConnectionError, DeniedConnection, PendingConnectionsManager, ServerConnectionPipeline,
    fill_accepted,
};
use crate::error::NetError;
use crate::message::{MessageBody, MessageFactory, MessageType, TimeResponseMessage};
use crate::metrics::NetworkStats;
use crate::packet::NetworkPacket;
use crate::peer::RemotePeersHandler;
use crate::replication::{NetworkWorld, ReplicationError, ReplicationManager};
use crate::socket::{DatagramSocket, UdpDatagramSocket};
use crate::time::TimeClock;

/// Authoritative endpoint: accepts handshakes, owns one [`RemotePeer`] per
/// client and replicates the entity set to all of them.
///
/// [`RemotePeer`]: crate::peer::RemotePeer
pub struct Server<S = UdpDatagramSocket> {
    socket: S,
    config: NetworkConfig,
    factory: MessageFactory,
    clock: TimeClock,
    peers: RemotePeersHandler,
    pending: PendingConnectionsManager<ServerConnectionPipeline>,
    replication: ReplicationManager,
    pending_events: VecDeque<ServerEvent>,
    recv_buffer: Vec<u8>,
}

impl Server<UdpDatagramSocket> {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: NetworkConfig) -> io::Result<Self> {
        let socket = UdpDatagramSocket::bind(addr)?;
        Ok(Self::new(socket, config))
    }
}

impl<S: DatagramSocket> Server<S> {
    pub fn new(socket: S, config: NetworkConfig) -> Self {
        Self::with_pipeline(socket, config, ServerConnectionPipeline::new())
    }

    /// Uses a caller-built pipeline, e.g. one with a seeded salt generator.
    pub fn with_pipeline(
        socket: S,
        config: NetworkConfig,
        pipeline: ServerConnectionPipeline,
    ) -> Self {
        log::info!("Server listening on {}", socket.local_addr());
        Self {
            factory: MessageFactory::new(config.initial_pool_size),
            clock: TimeClock::new(),
            peers: RemotePeersHandler::new(config.max_connections),
            pending: PendingConnectionsManager::new(
                pipeline,
                config.max_pending_connections,
                config.connection_timeout_seconds,
                config.allow_local_connections,
                config.mtu,
            ),
            replication: ReplicationManager::new(config.mtu),
            pending_events: VecDeque::new(),
            recv_buffer: vec![0; config.mtu],
            socket,
            config,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn clock(&self) -> &TimeClock {
        &self.clock
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    pub fn replication(&self) -> &ReplicationManager {
        &self.replication
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn pending_connection_count(&self) -> usize {
        self.pending.len()
    }

    pub fn connected_peer_ids(&self) -> Vec<u16> {
        self.peers.ids()
    }

    pub fn peer_stats(&self, peer_id: u16) -> Option<NetworkStats> {
        self.peers.get(peer_id).map(|peer| peer.stats())
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Every handshake that failed since the last call, oldest first.
    pub fn take_denied_connections(&mut self) -> Vec<DeniedConnection> {
        self.pending.take_denied_connections()
    }

    pub fn create_network_entity(
        &mut self,
        world: &mut dyn NetworkWorld,
        entity_type: u32,
        controlled_by_peer_id: u32,
        position: Vec3,
    ) -> Result<u32, ReplicationError> {
        self.replication.create_network_entity(
            world,
            entity_type,
            controlled_by_peer_id,
            position,
            &mut self.factory,
        )
    }

    pub fn remove_network_entity(&mut self, world: &mut dyn NetworkWorld, network_entity_id: u32) {
        self.replication
            .remove_network_entity(world, network_entity_id, &mut self.factory);
    }

    pub fn remove_entities_controlled_by(&mut self, world: &mut dyn NetworkWorld, peer_id: u16) {
        self.replication
            .remove_entities_controlled_by(world, u32::from(peer_id), &mut self.factory);
    }

    /// Tells the peer it is being dropped, then frees its slot.
    pub fn disconnect_peer(&mut self, peer_id: u16) -> Result<(), NetError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or(ConnectionError::NotConnected)?;
        let sent = send_disconnection(peer, &mut self.socket, &mut self.factory);
        self.remove_peer(peer_id, DisconnectReason::Kicked);
        sent
    }

    pub fn shutdown(&mut self) {
        for peer_id in self.peers.ids() {
            if let Err(e) = self.disconnect_peer(peer_id) {
                log::warn!("Peer {}: disconnection not sent: {}", peer_id, e);
            }
        }
        self.pending.clear(&mut self.factory);
        log::info!("Server shut down");
    }

    pub fn tick(&mut self, dt: f32) -> Result<(), NetError> {
        self.clock.update(dt);

        self.receive_packets()?;

        self.pending.update(dt, &mut self.factory);
        self.pending.send_data(&mut self.socket, &mut self.factory)?;
        self.promote_completed_connections();
        for denied in self.pending.remove_failed_connections(&mut self.factory) {
            log::info!("Connection from {} denied: {}", denied.address, denied.reason);
            self.pending_events.push_back(ServerEvent::ConnectionDenied {
                address: denied.address,
                reason: denied.reason,
            });
        }

        self.process_peer_messages();

        for peer_id in self.peers.update(dt, &mut self.factory) {
            log::info!("Peer {} timed out", peer_id);
            self.remove_peer(peer_id, DisconnectReason::Timeout);
        }

        for peer in self.peers.iter_mut() {
            self.replication
                .server_replicate_world_state(peer, &mut self.factory);
        }
        self.replication
            .clear_sent_replication_messages(&mut self.factory);

        for peer in self.peers.iter_mut() {
            if let Err(e) = peer.send_data(&mut self.socket, &mut self.factory) {
                log::error!("Peer {}: send failed: {}", peer.id(), e);
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("send to peer {} failed: {}", peer.id(), e),
                });
            }
        }

        Ok(())
    }

    fn receive_packets(&mut self) -> Result<(), NetError> {
        while let Some((size, from)) = self.socket.recv_from(&mut self.recv_buffer)? {
            let Some(packet) = parse_packet(
                &self.recv_buffer[..size],
                from,
                &mut self.factory,
                self.config.mtu,
            ) else {
                continue;
            };

            let replaced = self
                .peers
                .find(from)
                .filter(|peer| is_new_session_request(&packet, peer.client_salt()))
                .map(|peer| peer.id());
            if let Some(peer_id) = replaced {
                log::info!("Peer {} reconnecting from {}", peer_id, from);
                self.remove_peer(peer_id, DisconnectReason::Reconnected);
            }

            match self.peers.find_mut(from) {
                Some(peer) => peer.process_packet(packet, size, &mut self.factory),
                None => {
                    let free_slots = self.peers.max_connections() - self.peers.len();
                    self.pending
                        .process_packet(from, packet, &mut self.factory, free_slots);
                }
            }
        }
        Ok(())
    }

    fn promote_completed_connections(&mut self) {
        for mut connection in self.pending.take_completed_connections() {
            connection.reset(&mut self.factory);
            let address = connection.address();
            let peer_id = connection.client_id();

            match self.peers.add_remote_peer(
                address,
                peer_id,
                connection.client_salt(),
                connection.server_salt(),
                &self.config,
            ) {
                Ok(peer) => {
                    self.replication
                        .replicate_existing_entities(peer, &mut self.factory);
                    self.pending_events
                        .push_back(ServerEvent::PeerConnected { peer_id, address });
                }
                Err(e) => {
                    log::warn!("Could not promote connection from {}: {}", address, e);
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("promoting {} failed: {}", address, e),
                    });
                }
            }
        }
    }

    fn process_peer_messages(&mut self) {
        let server_time = self.clock.local_time_ms();
        let mut disconnected = Vec::new();

        for peer in self.peers.iter_mut() {
            while let Some(mut message) = peer.get_pending_ready_to_process_message() {
                match message.body_mut() {
                    MessageBody::TimeRequest(request) => {
                        let remote_time = request.remote_time;
                        let mut response = self.factory.lend_message(MessageType::TimeResponse);
                        if let MessageBody::TimeResponse(body) = response.body_mut() {
                            *body = TimeResponseMessage {
                                remote_time,
                                server_time,
                            };
                        }
                        if let Err(e) = peer.add_message(response, &mut self.factory) {
                            log::warn!("Peer {}: time response not queued: {}", peer.id(), e);
                        }
                    }
                    MessageBody::Inputs(inputs) => {
                        self.pending_events.push_back(ServerEvent::InputsReceived {
                            peer_id: peer.id(),
                            data: std::mem::take(&mut inputs.data),
                        });
                    }
                    MessageBody::ConnectionChallengeResponse(response) => {
                        // ConnectionAccepted was lost; the client is still retrying.
                        if response.data_prefix == peer.data_prefix() {
                            let mut accepted =
                                self.factory.lend_message(MessageType::ConnectionAccepted);
                            fill_accepted(accepted.body_mut(), peer.data_prefix(), peer.id());
                            if let Err(e) = peer.add_message(accepted, &mut self.factory) {
                                log::warn!("Peer {}: accepted not queued: {}", peer.id(), e);
                            }
                        }
                    }
                    MessageBody::Disconnection(disconnection) => {
                        if disconnection.data_prefix == peer.data_prefix() {
                            disconnected.push(peer.id());
                        } else {
                            log::warn!(
                                "Peer {}: ignoring disconnection with wrong prefix",
                                peer.id()
                            );
                        }
                    }
                    MessageBody::PingPong | MessageBody::ConnectionRequest(_) => {}
                    other => {
                        log::debug!(
                            "Peer {}: unexpected {:?} message",
                            peer.id(),
                            other.message_type()
                        );
                    }
                }
                self.factory.release_message(message);
            }
        }

        for peer_id in disconnected {
            self.remove_peer(peer_id, DisconnectReason::Graceful);
        }
    }

    fn remove_peer(&mut self, peer_id: u16, reason: DisconnectReason) {
        if let Some(address) = self.peers.remove(peer_id, &mut self.factory) {
            log::info!("Peer {} ({}) {}", peer_id, address, reason.as_str());
            self.pending_events.push_back(ServerEvent::PeerDisconnected {
                peer_id,
                address,
                reason,
            });
        }
    }
}

/// A ConnectionRequest with a salt other than the connected peer's. Resent
/// requests from the handshake that created the peer carry the same salt.
fn is_new_session_request(packet: &NetworkPacket, client_salt: u64) -> bool {
    packet.messages().iter().any(|message| {
        matches!(
            message.body(),
            MessageBody::ConnectionRequest(request) if request.client_salt != client_salt
        )
    })
}
