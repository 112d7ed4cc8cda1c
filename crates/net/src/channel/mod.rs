mod reliable_ordered;
mod unreliable_ordered;
mod unreliable_unordered;

use std::net::SocketAddr;

use crate::buffer::Buffer;
use crate::error::NetError;
use crate::message::{Message, MessageFactory, MessageFlags, MessageHeader, MessageType};
use crate::metrics::ChannelMetrics;
use crate::packet::{NetworkPacket, NetworkPacketHeader};
use crate::socket::DatagramSocket;

pub use reliable_ordered::{
    DEFAULT_RELIABLE_INITIAL_TIMEOUT_SECONDS, RELIABLE_ACK_WINDOW_SIZE,
    ReliableOrderedTransmissionChannel,
};
pub use unreliable_ordered::UnreliableOrderedTransmissionChannel;
pub use unreliable_unordered::UnreliableUnorderedTransmissionChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelType {
    UnreliableUnordered = 0,
    UnreliableOrdered = 1,
    ReliableOrdered = 2,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [
        ChannelType::UnreliableUnordered,
        ChannelType::UnreliableOrdered,
        ChannelType::ReliableOrdered,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// The channel that owns messages carrying `flags`. Reliable but unordered
    /// delivery is not offered.
    pub fn for_flags(flags: MessageFlags) -> Option<Self> {
        let reliable = flags.contains(MessageFlags::RELIABLE);
        let ordered = flags.contains(MessageFlags::ORDERED);
        match (reliable, ordered) {
            (false, false) => Some(Self::UnreliableUnordered),
            (false, true) => Some(Self::UnreliableOrdered),
            (true, true) => Some(Self::ReliableOrdered),
            (true, false) => None,
        }
    }

    pub fn flags(self) -> MessageFlags {
        match self {
            Self::UnreliableUnordered => MessageFlags::empty(),
            Self::UnreliableOrdered => MessageFlags::ORDERED,
            Self::ReliableOrdered => MessageFlags::RELIABLE | MessageFlags::ORDERED,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{message_type:?} message with flags {flags:?} does not belong to any channel")]
    NoMatchingChannel {
        message_type: MessageType,
        flags: MessageFlags,
    },
    #[error("{message_type:?} message rejected by the {channel_type:?} channel")]
    Rejected {
        message_type: MessageType,
        channel_type: ChannelType,
    },
}

/// One delivery lane between this endpoint and a single remote peer.
///
/// Outgoing messages are queued with `add_message_to_send` and packed into
/// packets by `create_and_send_packet`. Incoming packets hand their ACK
/// header to `process_acks` and their messages to `add_received_message`;
/// whatever the channel accepts comes out of `get_ready_to_process_message`,
/// and the caller owns (and must release) it from then on.
pub trait TransmissionChannel {
    fn channel_type(&self) -> ChannelType;

    fn mtu(&self) -> usize;

    fn is_message_suitable(&self, header: &MessageHeader) -> bool {
        ChannelType::for_flags(header.flags) == Some(self.channel_type())
    }

    /// Queues `message`, handing it back when its flags do not match this
    /// channel or it could never fit in a packet.
    fn add_message_to_send(&mut self, message: Box<Message>) -> Result<(), Box<Message>>;

    fn are_pending_messages_to_send(&self) -> bool;

    /// Wire size of the message `get_message_to_send` would return next.
    fn next_message_size(&self) -> Option<usize>;

    /// Takes the next message to put on the wire, stamping its sequence number.
    fn get_message_to_send(&mut self) -> Option<Box<Message>>;

    /// Takes back the messages of a packet that was just transmitted.
    fn on_packet_sent(&mut self, messages: Vec<Box<Message>>, factory: &mut MessageFactory);

    fn add_received_message(&mut self, message: Box<Message>, factory: &mut MessageFactory);

    fn are_pending_ready_to_process_messages(&self) -> bool;

    fn get_ready_to_process_message(&mut self) -> Option<Box<Message>>;

    /// `(last_acked_sequence_number, ack_bits)` for the next outgoing header.
    fn ack_state(&self) -> (u16, u32) {
        (0, 0)
    }

    fn process_acks(&mut self, _ack_bits: u32, _last_acked: u16, _factory: &mut MessageFactory) {}

    fn update(&mut self, _dt: f32) {}

    /// Drops all channel state, releasing every message it owns.
    fn reset(&mut self, factory: &mut MessageFactory);

    fn metrics(&self) -> &ChannelMetrics;

    fn metrics_mut(&mut self) -> &mut ChannelMetrics;

    fn rtt_ms(&self) -> f32 {
        0.0
    }

    /// Packs as many pending messages as fit under the MTU into one packet
    /// and sends it to `address`. Returns the number of bytes sent.
    fn create_and_send_packet(
        &mut self,
        socket: &mut dyn DatagramSocket,
        address: SocketAddr,
        factory: &mut MessageFactory,
    ) -> Result<usize, NetError> {
        let mut packet = NetworkPacket::new(self.channel_type(), self.mtu());
        let (last_acked, ack_bits) = self.ack_state();
        packet.set_acks(last_acked, ack_bits);

        while let Some(size) = self.next_message_size() {
            if !packet.can_message_fit(size) {
                break;
            }
            let Some(message) = self.get_message_to_send() else {
                break;
            };
            if let Err(message) = packet.add_message(message) {
                log::error!(
                    "{:?} message of {} bytes did not fit after size check",
                    message.message_type(),
                    message.size()
                );
                factory.release_message(message);
                break;
            }
        }

        let mut buffer = Buffer::new(packet.size());
        let result = packet
            .write(&mut buffer)
            .map_err(NetError::from)
            .and_then(|()| {
                socket
                    .send_to(buffer.as_bytes(), address)
                    .map_err(NetError::from)
            });

        let messages = packet.take_messages();
        let message_count = messages.len() as u64;
        self.on_packet_sent(messages, factory);

        let bytes = result?;
        let metrics = self.metrics_mut();
        metrics.packets_sent += 1;
        metrics.bytes_sent += bytes as u64;
        metrics.messages_sent += message_count;
        Ok(bytes)
    }
}

/// Whether a message of `message_size` bytes fits in an otherwise empty packet.
pub(crate) fn fits_empty_packet(message_size: usize, mtu: usize) -> bool {
    NetworkPacketHeader::SIZE + message_size <= mtu
}

/// Shared admission check for outgoing messages.
pub(crate) fn check_outgoing<C: TransmissionChannel + ?Sized>(
    channel: &C,
    message: &Message,
) -> bool {
    if !channel.is_message_suitable(message.header()) {
        log::warn!(
            "{:?} message with flags {:?} rejected by {:?} channel",
            message.message_type(),
            message.header().flags,
            channel.channel_type()
        );
        return false;
    }
    if !fits_empty_packet(message.size(), channel.mtu()) {
        log::error!(
            "{:?} message of {} bytes can never fit the {} byte mtu",
            message.message_type(),
            message.size(),
            channel.mtu()
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_pick_channel() {
        for channel_type in ChannelType::ALL {
            assert_eq!(ChannelType::for_flags(channel_type.flags()), Some(channel_type));
            assert_eq!(ChannelType::from_u8(channel_type as u8), Some(channel_type));
        }
        assert_eq!(ChannelType::for_flags(MessageFlags::RELIABLE), None);
        assert_eq!(ChannelType::from_u8(3), None);
    }
}
