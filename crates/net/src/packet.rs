use crate::buffer::{Buffer, BufferError};
use crate::channel::ChannelType;
use crate::message::{Message, MessageError, MessageFactory, MessageType};

pub const DEFAULT_MTU: usize = 1500;

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("unknown channel type {0}")]
    UnknownChannelType(u8),
    #[error("packet of {size} bytes exceeds mtu of {mtu}")]
    ExceedsMtu { size: usize, mtu: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPacketHeader {
    pub last_acked_sequence_number: u16,
    pub ack_bits: u32,
    pub channel_type: ChannelType,
}

impl NetworkPacketHeader {
    /// last acked + ack bits + channel type + message count.
    pub const SIZE: usize = 2 + 4 + 1 + 1;
}

/// A batch of messages sent or received as one datagram on a single channel.
#[derive(Debug)]
pub struct NetworkPacket {
    header: NetworkPacketHeader,
    messages: Vec<Box<Message>>,
    mtu: usize,
}

impl NetworkPacket {
    pub const MAX_MESSAGES: usize = u8::MAX as usize;

    pub fn new(channel_type: ChannelType, mtu: usize) -> Self {
        Self {
            header: NetworkPacketHeader {
                last_acked_sequence_number: 0,
                ack_bits: 0,
                channel_type,
            },
            messages: Vec::new(),
            mtu,
        }
    }

    pub fn header(&self) -> &NetworkPacketHeader {
        &self.header
    }

    pub fn channel_type(&self) -> ChannelType {
        self.header.channel_type
    }

    pub fn set_acks(&mut self, last_acked_sequence_number: u16, ack_bits: u32) {
        self.header.last_acked_sequence_number = last_acked_sequence_number;
        self.header.ack_bits = ack_bits;
    }

    pub fn size(&self) -> usize {
        NetworkPacketHeader::SIZE + self.messages.iter().map(|m| m.size()).sum::<usize>()
    }

    pub fn can_message_fit(&self, message_size: usize) -> bool {
        self.messages.len() < Self::MAX_MESSAGES && self.size() + message_size <= self.mtu
    }

    /// Appends `message`, handing it back when it would push the packet over
    /// the MTU.
    pub fn add_message(&mut self, message: Box<Message>) -> Result<(), Box<Message>> {
        if !self.can_message_fit(message.size()) {
            return Err(message);
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Box<Message>] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn contains_message_type(&self, message_type: MessageType) -> bool {
        self.messages
            .iter()
            .any(|m| m.message_type() == message_type)
    }

    pub fn take_messages(&mut self) -> Vec<Box<Message>> {
        std::mem::take(&mut self.messages)
    }

    pub fn release_messages(mut self, factory: &mut MessageFactory) {
        factory.release_all(self.take_messages());
    }

    pub fn write(&self, buffer: &mut Buffer) -> Result<(), PacketError> {
        let size = self.size();
        if size > self.mtu {
            return Err(PacketError::ExceedsMtu {
                size,
                mtu: self.mtu,
            });
        }

        buffer.write_u16(self.header.last_acked_sequence_number)?;
        buffer.write_u32(self.header.ack_bits)?;
        buffer.write_u8(self.header.channel_type as u8)?;
        buffer.write_u8(self.messages.len() as u8)?;
        for message in &self.messages {
            message.write(buffer)?;
        }
        Ok(())
    }

    /// Parses a datagram, lending one message per entry from `factory`. On
    /// failure every message read so far is released again.
    pub fn read(
        buffer: &mut Buffer,
        factory: &mut MessageFactory,
        mtu: usize,
    ) -> Result<Self, PacketError> {
        if buffer.len() > mtu {
            return Err(PacketError::ExceedsMtu {
                size: buffer.len(),
                mtu,
            });
        }

        let last_acked_sequence_number = buffer.read_u16()?;
        let ack_bits = buffer.read_u32()?;
        let channel_byte = buffer.read_u8()?;
        let channel_type =
            ChannelType::from_u8(channel_byte).ok_or(PacketError::UnknownChannelType(channel_byte))?;
        let count = buffer.read_u8()? as usize;

        let mut packet = Self::new(channel_type, mtu);
        packet.set_acks(last_acked_sequence_number, ack_bits);

        for _ in 0..count {
            match read_message(buffer, factory) {
                Ok(message) => packet.messages.push(message),
                Err(e) => {
                    packet.release_messages(factory);
                    return Err(e);
                }
            }
        }

        Ok(packet)
    }
}

fn read_message(
    buffer: &mut Buffer,
    factory: &mut MessageFactory,
) -> Result<Box<Message>, PacketError> {
    let type_byte = buffer.read_u8()?;
    let message_type =
        MessageType::from_u8(type_byte).ok_or(MessageError::UnknownMessageType(type_byte))?;

    let mut message = factory.lend_message(message_type);
    match message.read_after_type(buffer) {
        Ok(()) => Ok(message),
        Err(e) => {
            factory.release_message(message);
            Err(e.into())
        }
    }
}
