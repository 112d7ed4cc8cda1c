use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use super::{ClientEvent, DisconnectReason, parse_packet, send_disconnection};
use crate::config::NetworkConfig;
use crate::connection::{
    ClientConnectionPipeline, ConnectionError, ConnectionFailedReason, PendingConnectionsManager,
};
use crate::error::NetError;
use crate::message::{MessageBody, MessageFactory, MessageFlags, MessageType};
use crate::metrics::NetworkStats;
use crate::peer::RemotePeer;
use crate::replication::{NetworkWorld, ReplicationMessagesProcessor};
use crate::socket::{DatagramSocket, UdpDatagramSocket};
use crate::time::{TimeClock, TimeSyncer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Failed(ConnectionFailedReason),
}

/// Connects to one server, mirrors its entities into a [`NetworkWorld`] and
/// keeps an estimate of the server clock.
pub struct Client<S = UdpDatagramSocket> {
    socket: S,
    config: NetworkConfig,
    factory: MessageFactory,
    clock: TimeClock,
    state: ClientState,
    server_address: Option<SocketAddr>,
    pending: PendingConnectionsManager<ClientConnectionPipeline>,
    server: Option<RemotePeer>,
    local_peer_id: u16,
    replication: ReplicationMessagesProcessor,
    time_syncer: TimeSyncer,
    pending_events: VecDeque<ClientEvent>,
    recv_buffer: Vec<u8>,
}

impl Client<UdpDatagramSocket> {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: NetworkConfig) -> io::Result<Self> {
        let socket = UdpDatagramSocket::bind(addr)?;
        Ok(Self::new(socket, config))
    }
}

impl<S: DatagramSocket> Client<S> {
    pub fn new(socket: S, config: NetworkConfig) -> Self {
        let pipeline = ClientConnectionPipeline::new(config.connection_resend_interval_seconds);
        Self::with_pipeline(socket, config, pipeline)
    }

    pub fn with_pipeline(
        socket: S,
        config: NetworkConfig,
        pipeline: ClientConnectionPipeline,
    ) -> Self {
        Self {
            factory: MessageFactory::new(config.initial_pool_size),
            clock: TimeClock::new(),
            state: ClientState::Disconnected,
            server_address: None,
            pending: PendingConnectionsManager::new(
                pipeline,
                config.max_pending_connections,
                config.connection_timeout_seconds,
                config.allow_local_connections,
                config.mtu,
            ),
            server: None,
            local_peer_id: 0,
            replication: ReplicationMessagesProcessor::new(),
            time_syncer: TimeSyncer::new(
                config.time_requests_frequency_seconds,
                config.time_requests_burst_size,
            ),
            pending_events: VecDeque::new(),
            recv_buffer: vec![0; config.mtu],
            socket,
            config,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.server_address
    }

    /// Id assigned by the server; 0 until connected.
    pub fn local_peer_id(&self) -> u16 {
        self.local_peer_id
    }

    pub fn clock(&self) -> &TimeClock {
        &self.clock
    }

    pub fn server_time_seconds(&self) -> f64 {
        self.clock.server_time_seconds()
    }

    pub fn is_time_synchronized(&self) -> bool {
        self.time_syncer.is_synchronized()
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    pub fn replication(&self) -> &ReplicationMessagesProcessor {
        &self.replication
    }

    pub fn stats(&self) -> Option<NetworkStats> {
        self.server.as_ref().map(RemotePeer::stats)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn connect(&mut self, address: SocketAddr) -> Result<(), ConnectionError> {
        match self.state {
            ClientState::Connecting => return Err(ConnectionError::AlreadyPending(address)),
            ClientState::Connected => return Err(ConnectionError::AlreadyConnected(address)),
            ClientState::Disconnected | ClientState::Failed(_) => {}
        }

        self.pending.start_connecting_to(address)?;
        self.server_address = Some(address);
        self.state = ClientState::Connecting;
        log::info!("Connecting to {}", address);
        Ok(())
    }

    /// Leaves the server, or abandons a handshake still in progress.
    pub fn disconnect(&mut self, world: &mut dyn NetworkWorld) -> Result<(), NetError> {
        let mut result = Ok(());
        if let Some(server) = self.server.as_mut() {
            result = send_disconnection(server, &mut self.socket, &mut self.factory);
            self.drop_server(world, DisconnectReason::Graceful);
        } else if let Some(address) = self.server_address.take() {
            self.pending.remove(address, &mut self.factory);
            self.state = ClientState::Disconnected;
        }
        result
    }

    /// Sends an opaque input blob on the unreliable ordered channel.
    pub fn send_inputs(&mut self, data: &[u8]) -> Result<(), NetError> {
        let server = self.server.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut message = self.factory.lend_message(MessageType::Inputs);
        message.set_flags(MessageFlags::ORDERED);
        if let MessageBody::Inputs(inputs) = message.body_mut() {
            inputs.data.extend_from_slice(data);
        }
        server.add_message(message, &mut self.factory)?;
        Ok(())
    }

    pub fn tick(&mut self, dt: f32, world: &mut dyn NetworkWorld) -> Result<(), NetError> {
        self.clock.update(dt);

        self.receive_packets()?;

        self.pending.update(dt, &mut self.factory);
        self.pending.send_data(&mut self.socket, &mut self.factory)?;
        self.promote_completed_connection();
        for denied in self.pending.remove_failed_connections(&mut self.factory) {
            log::warn!("Connection to {} failed: {}", denied.address, denied.reason);
            self.server_address = None;
            self.state = ClientState::Failed(denied.reason);
            self.pending_events
                .push_back(ClientEvent::ConnectionFailed { reason: denied.reason });
        }

        self.process_server_messages(world);

        let Some(server) = self.server.as_mut() else {
            return Ok(());
        };
        server.update(dt, &mut self.factory);
        if server.is_inactive() {
            log::warn!("Server {} stopped responding", server.address());
            self.drop_server(world, DisconnectReason::Timeout);
            return Ok(());
        }

        self.time_syncer
            .update(dt, &self.clock, server, &mut self.factory);
        if let Err(e) = server.send_data(&mut self.socket, &mut self.factory) {
            log::error!("Send to server failed: {}", e);
            self.pending_events.push_back(ClientEvent::Error {
                message: format!("send failed: {}", e),
            });
        }
        Ok(())
    }

    fn receive_packets(&mut self) -> Result<(), NetError> {
        while let Some((size, from)) = self.socket.recv_from(&mut self.recv_buffer)? {
            if self.server_address != Some(from) {
                log::debug!("Ignoring datagram from {}", from);
                continue;
            }
            let Some(packet) = parse_packet(
                &self.recv_buffer[..size],
                from,
                &mut self.factory,
                self.config.mtu,
            ) else {
                continue;
            };

            match self.server.as_mut() {
                Some(server) => server.process_packet(packet, size, &mut self.factory),
                None => {
                    self.pending.process_packet(from, packet, &mut self.factory, 1);
                    // Peer traffic can trail ConnectionAccepted in the same batch.
                    self.promote_completed_connection();
                }
            }
        }
        Ok(())
    }

    fn promote_completed_connection(&mut self) {
        for mut connection in self.pending.take_completed_connections() {
            connection.reset(&mut self.factory);
            if self.server.is_some() {
                continue;
            }

            let peer_id = connection.client_id();
            self.server = Some(RemotePeer::new(
                connection.address(),
                0,
                connection.client_salt(),
                connection.server_salt(),
                &self.config,
            ));
            self.local_peer_id = peer_id;
            self.replication.set_local_peer_id(u32::from(peer_id));
            self.time_syncer.reset();
            self.state = ClientState::Connected;
            log::info!("Connected to {} as peer {}", connection.address(), peer_id);
            self.pending_events
                .push_back(ClientEvent::Connected { peer_id });
        }
    }

    fn process_server_messages(&mut self, world: &mut dyn NetworkWorld) {
        let Some(server) = self.server.as_mut() else {
            return;
        };

        let mut disconnected = false;
        while let Some(message) = server.get_pending_ready_to_process_message() {
            match message.body() {
                MessageBody::Replication(_) => {
                    if let Err(e) = self.replication.process_replication_message(&message, world) {
                        log::warn!("Replication message rejected: {}", e);
                    }
                }
                MessageBody::TimeResponse(response) => {
                    self.time_syncer
                        .process_time_response(response, &mut self.clock);
                }
                MessageBody::Disconnection(disconnection) => {
                    if disconnection.data_prefix == server.data_prefix() {
                        disconnected = true;
                    } else {
                        log::warn!("Ignoring disconnection with wrong prefix");
                    }
                }
                MessageBody::PingPong | MessageBody::ConnectionAccepted(_) => {}
                other => {
                    log::debug!("Unexpected {:?} message from server", other.message_type());
                }
            }
            self.factory.release_message(message);
            if disconnected {
                break;
            }
        }

        if disconnected {
            self.drop_server(world, DisconnectReason::Kicked);
        }
    }

    fn drop_server(&mut self, world: &mut dyn NetworkWorld, reason: DisconnectReason) {
        if let Some(mut server) = self.server.take() {
            server.reset(&mut self.factory);
            log::info!("Disconnected from {}: {}", server.address(), reason.as_str());
        }
        self.server_address = None;
        self.local_peer_id = 0;
        self.replication.clear(world);
        self.replication.set_local_peer_id(0);
        self.time_syncer.reset();
        self.clock.set_server_clock_delta(0.0);
        self.state = ClientState::Disconnected;
        self.pending_events
            .push_back(ClientEvent::Disconnected { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::test_world::TestWorld;
    use crate::simulator::SimulatedNetwork;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_connect_twice_is_refused() {
        let network = SimulatedNetwork::perfect();
        let mut client = Client::new(network.bind(addr(1)), NetworkConfig::client());
        client.connect(addr(2)).unwrap();
        assert_eq!(client.state(), ClientState::Connecting);
        assert!(matches!(
            client.connect(addr(2)),
            Err(ConnectionError::AlreadyPending(_))
        ));
    }

    #[test]
    fn test_unanswered_connect_times_out() {
        let network = SimulatedNetwork::perfect();
        let mut client = Client::new(network.bind(addr(1)), NetworkConfig::client());
        let mut world = TestWorld::default();
        client.connect(addr(2)).unwrap();

        for _ in 0..6 {
            client.tick(1.0, &mut world).unwrap();
        }

        assert_eq!(
            client.state(),
            ClientState::Failed(ConnectionFailedReason::Timeout)
        );
        let events: Vec<ClientEvent> = client.drain_events().collect();
        assert_eq!(
            events,
            vec![ClientEvent::ConnectionFailed {
                reason: ConnectionFailedReason::Timeout
            }]
        );
        assert_eq!(client.factory().total_outstanding(), 0);
    }

    #[test]
    fn test_send_inputs_requires_connection() {
        let network = SimulatedNetwork::perfect();
        let mut client = Client::new(network.bind(addr(1)), NetworkConfig::client());
        assert!(matches!(
            client.send_inputs(&[1, 2, 3]),
            Err(NetError::Connection(ConnectionError::NotConnected))
        ));
    }

    #[test]
    fn test_disconnect_abandons_handshake() {
        let network = SimulatedNetwork::perfect();
        let mut client = Client::new(network.bind(addr(1)), NetworkConfig::client());
        let mut world = TestWorld::default();
        client.connect(addr(2)).unwrap();
        client.tick(0.1, &mut world).unwrap();

        client.disconnect(&mut world).unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.server_address(), None);
        assert_eq!(client.factory().total_outstanding(), 0);
    }
}
