use std::net::SocketAddr;

use crate::channel::{
    ChannelError, ChannelType, ReliableOrderedTransmissionChannel, TransmissionChannel,
    UnreliableOrderedTransmissionChannel, UnreliableUnorderedTransmissionChannel,
};
use crate::config::NetworkConfig;
use crate::error::NetError;
use crate::message::{Message, MessageFactory, MessageType};
use crate::metrics::NetworkStats;
use crate::packet::NetworkPacket;
use crate::socket::DatagramSocket;

/// Upper bound on packets one channel may emit per tick.
pub const MAX_PACKETS_PER_CHANNEL_PER_TICK: usize = 64;

/// A verified remote endpoint and the three channels used to talk to it.
#[derive(Debug)]
pub struct RemotePeer {
    address: SocketAddr,
    id: u16,
    client_salt: u64,
    server_salt: u64,
    inactivity_timer: f32,
    inactivity_timeout: f32,
    keep_alive_timer: f32,
    keep_alive_interval: f32,
    bytes_received: u64,
    unreliable_unordered: UnreliableUnorderedTransmissionChannel,
    unreliable_ordered: UnreliableOrderedTransmissionChannel,
    reliable_ordered: ReliableOrderedTransmissionChannel,
}

impl RemotePeer {
    pub fn new(
        address: SocketAddr,
        id: u16,
        client_salt: u64,
        server_salt: u64,
        config: &NetworkConfig,
    ) -> Self {
        Self {
            address,
            id,
            client_salt,
            server_salt,
            inactivity_timer: 0.0,
            inactivity_timeout: config.peer_inactivity_timeout_seconds,
            keep_alive_timer: 0.0,
            keep_alive_interval: config.keep_alive_interval_seconds,
            bytes_received: 0,
            unreliable_unordered: UnreliableUnorderedTransmissionChannel::new(config.mtu),
            unreliable_ordered: UnreliableOrderedTransmissionChannel::new(config.mtu),
            reliable_ordered: ReliableOrderedTransmissionChannel::new(
                config.mtu,
                config.reliable_initial_timeout_seconds,
            ),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn client_salt(&self) -> u64 {
        self.client_salt
    }

    pub fn server_salt(&self) -> u64 {
        self.server_salt
    }

    pub fn data_prefix(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn channel(&self, channel_type: ChannelType) -> &dyn TransmissionChannel {
        match channel_type {
            ChannelType::UnreliableUnordered => &self.unreliable_unordered,
            ChannelType::UnreliableOrdered => &self.unreliable_ordered,
            ChannelType::ReliableOrdered => &self.reliable_ordered,
        }
    }

    pub fn channel_mut(&mut self, channel_type: ChannelType) -> &mut dyn TransmissionChannel {
        match channel_type {
            ChannelType::UnreliableUnordered => &mut self.unreliable_unordered,
            ChannelType::UnreliableOrdered => &mut self.unreliable_ordered,
            ChannelType::ReliableOrdered => &mut self.reliable_ordered,
        }
    }

    pub fn reliable_ordered(&self) -> &ReliableOrderedTransmissionChannel {
        &self.reliable_ordered
    }

    /// Queues `message` on the channel its flags select. A rejected message is
    /// released back to `factory`.
    pub fn add_message(
        &mut self,
        message: Box<Message>,
        factory: &mut MessageFactory,
    ) -> Result<(), ChannelError> {
        let header = *message.header();
        let Some(channel_type) = ChannelType::for_flags(header.flags) else {
            log::warn!(
                "Peer {}: {:?} message has no channel for flags {:?}",
                self.id,
                header.message_type,
                header.flags
            );
            factory.release_message(message);
            return Err(ChannelError::NoMatchingChannel {
                message_type: header.message_type,
                flags: header.flags,
            });
        };

        match self.channel_mut(channel_type).add_message_to_send(message) {
            Ok(()) => Ok(()),
            Err(message) => {
                factory.release_message(message);
                Err(ChannelError::Rejected {
                    message_type: header.message_type,
                    channel_type,
                })
            }
        }
    }

    /// Routes a parsed packet: ACKs first, then every message the channel
    /// accepts. Messages with flags foreign to the packet's channel are dropped.
    pub fn process_packet(
        &mut self,
        mut packet: NetworkPacket,
        size: usize,
        factory: &mut MessageFactory,
    ) {
        self.inactivity_timer = 0.0;
        self.bytes_received += size as u64;

        let header = *packet.header();
        let peer_id = self.id;
        let channel = self.channel_mut(header.channel_type);
        channel.metrics_mut().packets_received += 1;
        channel.process_acks(header.ack_bits, header.last_acked_sequence_number, factory);

        for message in packet.take_messages() {
            if !channel.is_message_suitable(message.header()) {
                log::warn!(
                    "Peer {}: dropping {:?} message with flags {:?} on {:?} channel",
                    peer_id,
                    message.message_type(),
                    message.header().flags,
                    header.channel_type
                );
                factory.release_message(message);
                continue;
            }
            channel.add_received_message(message, factory);
        }
    }

    pub fn are_pending_ready_to_process_messages(&self) -> bool {
        ChannelType::ALL
            .iter()
            .any(|&t| self.channel(t).are_pending_ready_to_process_messages())
    }

    /// Next delivered message, reliable traffic first. The caller releases it.
    pub fn get_pending_ready_to_process_message(&mut self) -> Option<Box<Message>> {
        self.reliable_ordered
            .get_ready_to_process_message()
            .or_else(|| self.unreliable_ordered.get_ready_to_process_message())
            .or_else(|| self.unreliable_unordered.get_ready_to_process_message())
    }

    pub fn update(&mut self, dt: f32, factory: &mut MessageFactory) {
        self.inactivity_timer += dt;
        self.keep_alive_timer += dt;

        for channel_type in ChannelType::ALL {
            self.channel_mut(channel_type).update(dt);
        }

        if self.keep_alive_interval > 0.0 && self.keep_alive_timer >= self.keep_alive_interval {
            self.keep_alive_timer = 0.0;
            let ping = factory.lend_message(MessageType::PingPong);
            if let Err(e) = self.add_message(ping, factory) {
                log::warn!("Peer {}: keep-alive not queued: {}", self.id, e);
            }
        }
    }

    pub fn is_inactive(&self) -> bool {
        self.inactivity_timer >= self.inactivity_timeout
    }

    /// Flushes every channel, reliable first.
    pub fn send_data(
        &mut self,
        socket: &mut dyn DatagramSocket,
        factory: &mut MessageFactory,
    ) -> Result<(), NetError> {
        let address = self.address;
        for channel_type in [
            ChannelType::ReliableOrdered,
            ChannelType::UnreliableOrdered,
            ChannelType::UnreliableUnordered,
        ] {
            let channel = self.channel_mut(channel_type);
            let mut packets = 0;
            while channel.are_pending_messages_to_send()
                && packets < MAX_PACKETS_PER_CHANNEL_PER_TICK
            {
                channel.create_and_send_packet(socket, address, factory)?;
                packets += 1;
            }
        }
        Ok(())
    }

    /// Drops all queued traffic, returning every owned message to the pool.
    pub fn reset(&mut self, factory: &mut MessageFactory) {
        for channel_type in ChannelType::ALL {
            self.channel_mut(channel_type).reset(factory);
        }
        self.inactivity_timer = 0.0;
        self.keep_alive_timer = 0.0;
        self.bytes_received = 0;
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();
        for channel_type in ChannelType::ALL {
            stats.accumulate(self.channel(channel_type).metrics());
        }
        stats.rtt_ms = self.reliable_ordered.rtt_ms();
        stats.bytes_received = self.bytes_received;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, MessageFlags};
    use crate::simulator::SimulatedNetwork;
    use crate::buffer::Buffer;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn peer(port: u16, id: u16) -> RemotePeer {
        RemotePeer::new(addr(port), id, 0xAA, 0x55, &NetworkConfig::default())
    }

    fn inputs(factory: &mut MessageFactory, flags: MessageFlags, payload: u8) -> Box<Message> {
        let mut message = factory.lend_message(MessageType::Inputs);
        message.set_flags(flags);
        if let MessageBody::Inputs(inputs) = message.body_mut() {
            inputs.data.push(payload);
        }
        message
    }

    /// Delivers every datagram waiting on `socket` to `receiver`.
    fn pump(
        socket: &mut impl DatagramSocket,
        receiver: &mut RemotePeer,
        factory: &mut MessageFactory,
    ) {
        let mut data = [0u8; 1500];
        while let Some((size, _)) = socket.recv_from(&mut data).unwrap() {
            let mut buffer = Buffer::from_bytes(&data[..size]);
            let packet = NetworkPacket::read(&mut buffer, factory, 1500).unwrap();
            receiver.process_packet(packet, size, factory);
        }
    }

    #[test]
    fn test_data_prefix() {
        assert_eq!(peer(1, 1).data_prefix(), 0xAA ^ 0x55);
    }

    #[test]
    fn test_add_message_picks_channel_by_flags() {
        let mut factory = MessageFactory::new(4);
        let mut peer = peer(1, 1);

        peer.add_message(inputs(&mut factory, MessageFlags::ORDERED, 0), &mut factory)
            .unwrap();
        assert!(peer
            .channel(ChannelType::UnreliableOrdered)
            .are_pending_messages_to_send());
        assert!(!peer
            .channel(ChannelType::ReliableOrdered)
            .are_pending_messages_to_send());

        let result = peer.add_message(inputs(&mut factory, MessageFlags::RELIABLE, 0), &mut factory);
        assert!(matches!(result, Err(ChannelError::NoMatchingChannel { .. })));
        assert_eq!(factory.outstanding(MessageType::Inputs), 1);
    }

    #[test]
    fn test_exchange_over_simulated_network() {
        let network = SimulatedNetwork::perfect();
        let mut socket_a = network.bind(addr(1));
        let mut socket_b = network.bind(addr(2));
        let mut factory = MessageFactory::new(8);

        let mut a = peer(2, 1);
        let mut b = peer(1, 2);

        for payload in 0..3 {
            let reliable = inputs(&mut factory, MessageFlags::RELIABLE | MessageFlags::ORDERED, payload);
            a.add_message(reliable, &mut factory).unwrap();
        }
        a.add_message(inputs(&mut factory, MessageFlags::empty(), 9), &mut factory)
            .unwrap();
        a.send_data(&mut socket_a, &mut factory).unwrap();

        pump(&mut socket_b, &mut b, &mut factory);

        let mut received = Vec::new();
        while let Some(message) = b.get_pending_ready_to_process_message() {
            if let MessageBody::Inputs(inputs) = message.body() {
                received.push(inputs.data[0]);
            }
            factory.release_message(message);
        }
        assert_eq!(received, vec![0, 1, 2, 9]);

        // b acks on its next flush, which clears a's unacked list
        b.send_data(&mut socket_b, &mut factory).unwrap();
        pump(&mut socket_a, &mut a, &mut factory);
        assert_eq!(a.reliable_ordered().unacked_count(), 0);
        assert_eq!(factory.total_outstanding(), 0);
        assert_eq!(a.stats().packets_sent, 2);
    }

    #[test]
    fn test_inactivity_and_keep_alive() {
        let mut factory = MessageFactory::new(4);
        let mut peer = peer(1, 1);

        peer.update(1.0, &mut factory);
        assert!(peer
            .channel(ChannelType::UnreliableUnordered)
            .are_pending_messages_to_send());

        for _ in 0..9 {
            peer.update(1.0, &mut factory);
        }
        assert!(peer.is_inactive());

        peer.reset(&mut factory);
        assert!(!peer.is_inactive());
        assert_eq!(factory.total_outstanding(), 0);
    }
}
