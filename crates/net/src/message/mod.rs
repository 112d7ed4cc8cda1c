mod factory;

use bitflags::bitflags;

use crate::buffer::{Buffer, BufferError};
use crate::connection::ConnectionFailedReason;
use crate::replication::ReplicationAction;

pub use factory::{DEFAULT_INITIAL_POOL_SIZE, MessageFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ConnectionRequest = 0,
    ConnectionChallenge = 1,
    ConnectionChallengeResponse = 2,
    ConnectionAccepted = 3,
    ConnectionDenied = 4,
    Disconnection = 5,
    TimeRequest = 6,
    TimeResponse = 7,
    Replication = 8,
    Inputs = 9,
    PingPong = 10,
}

impl MessageType {
    pub const COUNT: usize = 11;

    pub const ALL: [MessageType; Self::COUNT] = [
        MessageType::ConnectionRequest,
        MessageType::ConnectionChallenge,
        MessageType::ConnectionChallengeResponse,
        MessageType::ConnectionAccepted,
        MessageType::ConnectionDenied,
        MessageType::Disconnection,
        MessageType::TimeRequest,
        MessageType::TimeResponse,
        MessageType::Replication,
        MessageType::Inputs,
        MessageType::PingPong,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u8 {
        const RELIABLE = 1 << 0;
        const ORDERED = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub sequence_number: u16,
    pub flags: MessageFlags,
}

impl MessageHeader {
    pub const SIZE: usize = 4;

    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            sequence_number: 0,
            flags: MessageFlags::empty(),
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(MessageFlags::RELIABLE)
    }

    pub fn is_ordered(&self) -> bool {
        self.flags.contains(MessageFlags::ORDERED)
    }

    pub fn write(&self, buffer: &mut Buffer) -> Result<(), BufferError> {
        buffer.write_u8(self.message_type as u8)?;
        buffer.write_u16(self.sequence_number)?;
        buffer.write_u8(self.flags.bits())
    }

    /// Reads the part of the header that follows the type byte.
    fn read_after_type(&mut self, buffer: &mut Buffer) -> Result<(), BufferError> {
        self.sequence_number = buffer.read_u16()?;
        self.flags = MessageFlags::from_bits_truncate(buffer.read_u8()?);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionRequestMessage {
    pub client_salt: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionChallengeMessage {
    pub client_salt: u64,
    pub server_salt: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionChallengeResponseMessage {
    pub data_prefix: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionAcceptedMessage {
    pub data_prefix: u64,
    pub client_id: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionDeniedMessage {
    pub reason: ConnectionFailedReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisconnectionMessage {
    pub data_prefix: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRequestMessage {
    pub remote_time: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeResponseMessage {
    pub remote_time: u32,
    pub server_time: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationMessage {
    pub action: ReplicationAction,
    pub network_entity_id: u32,
    pub controlled_by_peer_id: u32,
    pub replicated_class_id: u32,
    pub data: Vec<u8>,
}

impl ReplicationMessage {
    /// action + entity id + controller id + class id + data size.
    pub const FIXED_SIZE: usize = 1 + 4 + 4 + 4 + 2;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputsMessage {
    pub data: Vec<u8>,
}

/// Type-specific payload of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    ConnectionRequest(ConnectionRequestMessage),
    ConnectionChallenge(ConnectionChallengeMessage),
    ConnectionChallengeResponse(ConnectionChallengeResponseMessage),
    ConnectionAccepted(ConnectionAcceptedMessage),
    ConnectionDenied(ConnectionDeniedMessage),
    Disconnection(DisconnectionMessage),
    TimeRequest(TimeRequestMessage),
    TimeResponse(TimeResponseMessage),
    Replication(ReplicationMessage),
    Inputs(InputsMessage),
    PingPong,
}

impl MessageBody {
    fn new(message_type: MessageType) -> Self {
        match message_type {
            MessageType::ConnectionRequest => Self::ConnectionRequest(Default::default()),
            MessageType::ConnectionChallenge => Self::ConnectionChallenge(Default::default()),
            MessageType::ConnectionChallengeResponse => {
                Self::ConnectionChallengeResponse(Default::default())
            }
            MessageType::ConnectionAccepted => Self::ConnectionAccepted(Default::default()),
            MessageType::ConnectionDenied => Self::ConnectionDenied(Default::default()),
            MessageType::Disconnection => Self::Disconnection(Default::default()),
            MessageType::TimeRequest => Self::TimeRequest(Default::default()),
            MessageType::TimeResponse => Self::TimeResponse(Default::default()),
            MessageType::Replication => Self::Replication(Default::default()),
            MessageType::Inputs => Self::Inputs(Default::default()),
            MessageType::PingPong => Self::PingPong,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ConnectionRequest(_) => MessageType::ConnectionRequest,
            Self::ConnectionChallenge(_) => MessageType::ConnectionChallenge,
            Self::ConnectionChallengeResponse(_) => MessageType::ConnectionChallengeResponse,
            Self::ConnectionAccepted(_) => MessageType::ConnectionAccepted,
            Self::ConnectionDenied(_) => MessageType::ConnectionDenied,
            Self::Disconnection(_) => MessageType::Disconnection,
            Self::TimeRequest(_) => MessageType::TimeRequest,
            Self::TimeResponse(_) => MessageType::TimeResponse,
            Self::Replication(_) => MessageType::Replication,
            Self::Inputs(_) => MessageType::Inputs,
            Self::PingPong => MessageType::PingPong,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::ConnectionRequest(_) => 8,
            Self::ConnectionChallenge(_) => 16,
            Self::ConnectionChallengeResponse(_) => 8,
            Self::ConnectionAccepted(_) => 10,
            Self::ConnectionDenied(_) => 1,
            Self::Disconnection(_) => 8,
            Self::TimeRequest(_) => 4,
            Self::TimeResponse(_) => 8,
            Self::Replication(replication) => ReplicationMessage::FIXED_SIZE + replication.data.len(),
            Self::Inputs(inputs) => 2 + inputs.data.len(),
            Self::PingPong => 0,
        }
    }

    fn write(&self, buffer: &mut Buffer) -> Result<(), MessageError> {
        match self {
            Self::ConnectionRequest(m) => buffer.write_u64(m.client_salt)?,
            Self::ConnectionChallenge(m) => {
                buffer.write_u64(m.client_salt)?;
                buffer.write_u64(m.server_salt)?;
            }
            Self::ConnectionChallengeResponse(m) => buffer.write_u64(m.data_prefix)?,
            Self::ConnectionAccepted(m) => {
                buffer.write_u64(m.data_prefix)?;
                buffer.write_u16(m.client_id)?;
            }
            Self::ConnectionDenied(m) => buffer.write_u8(m.reason as u8)?,
            Self::Disconnection(m) => buffer.write_u64(m.data_prefix)?,
            Self::TimeRequest(m) => buffer.write_u32(m.remote_time)?,
            Self::TimeResponse(m) => {
                buffer.write_u32(m.remote_time)?;
                buffer.write_u32(m.server_time)?;
            }
            Self::Replication(m) => {
                buffer.write_u8(m.action as u8)?;
                buffer.write_u32(m.network_entity_id)?;
                buffer.write_u32(m.controlled_by_peer_id)?;
                buffer.write_u32(m.replicated_class_id)?;
                write_blob(buffer, &m.data)?;
            }
            Self::Inputs(m) => write_blob(buffer, &m.data)?,
            Self::PingPong => {}
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut Buffer) -> Result<(), MessageError> {
        match self {
            Self::ConnectionRequest(m) => m.client_salt = buffer.read_u64()?,
            Self::ConnectionChallenge(m) => {
                m.client_salt = buffer.read_u64()?;
                m.server_salt = buffer.read_u64()?;
            }
            Self::ConnectionChallengeResponse(m) => m.data_prefix = buffer.read_u64()?,
            Self::ConnectionAccepted(m) => {
                m.data_prefix = buffer.read_u64()?;
                m.client_id = buffer.read_u16()?;
            }
            Self::ConnectionDenied(m) => {
                m.reason = ConnectionFailedReason::from_u8(buffer.read_u8()?);
            }
            Self::Disconnection(m) => m.data_prefix = buffer.read_u64()?,
            Self::TimeRequest(m) => m.remote_time = buffer.read_u32()?,
            Self::TimeResponse(m) => {
                m.remote_time = buffer.read_u32()?;
                m.server_time = buffer.read_u32()?;
            }
            Self::Replication(m) => {
                let action = buffer.read_u8()?;
                m.action = ReplicationAction::from_u8(action)
                    .ok_or(MessageError::UnknownReplicationAction(action))?;
                m.network_entity_id = buffer.read_u32()?;
                m.controlled_by_peer_id = buffer.read_u32()?;
                m.replicated_class_id = buffer.read_u32()?;
                read_blob(buffer, &mut m.data)?;
            }
            Self::Inputs(m) => read_blob(buffer, &mut m.data)?,
            Self::PingPong => {}
        }
        Ok(())
    }

    /// Restores pooled defaults while keeping allocated capacity.
    fn reset(&mut self) {
        match self {
            Self::Replication(m) => {
                m.action = ReplicationAction::default();
                m.network_entity_id = 0;
                m.controlled_by_peer_id = 0;
                m.replicated_class_id = 0;
                m.data.clear();
            }
            Self::Inputs(m) => m.data.clear(),
            other => *other = Self::new(other.message_type()),
        }
    }
}

fn write_blob(buffer: &mut Buffer, data: &[u8]) -> Result<(), MessageError> {
    let size = u16::try_from(data.len()).map_err(|_| MessageError::DataTooLarge(data.len()))?;
    buffer.write_u16(size)?;
    buffer.write_data(data)?;
    Ok(())
}

fn read_blob(buffer: &mut Buffer, out: &mut Vec<u8>) -> Result<(), MessageError> {
    let size = buffer.read_u16()? as usize;
    out.clear();
    out.extend_from_slice(buffer.read_data(size)?);
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("unknown replication action {0}")]
    UnknownReplicationAction(u8),
    #[error("message data of {0} bytes does not fit a u16 length prefix")]
    DataTooLarge(usize),
}

/// A wire message. Instances are lent by a [`MessageFactory`] and handed
/// around as `Box<Message>`; whoever holds the box owns the message until it
/// is released back to the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    body: MessageBody,
}

impl Message {
    pub(crate) fn new(message_type: MessageType) -> Self {
        Self {
            header: MessageHeader::new(message_type),
            body: MessageBody::new(message_type),
        }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn set_flags(&mut self, flags: MessageFlags) {
        self.header.flags = flags;
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut MessageBody {
        &mut self.body
    }

    pub fn size(&self) -> usize {
        MessageHeader::SIZE + self.body.size()
    }

    pub fn write(&self, buffer: &mut Buffer) -> Result<(), MessageError> {
        self.header.write(buffer)?;
        self.body.write(buffer)
    }

    /// Reads everything after the type byte, which the caller already consumed
    /// to pick the pooled instance.
    pub(crate) fn read_after_type(&mut self, buffer: &mut Buffer) -> Result<(), MessageError> {
        self.header.read_after_type(buffer)?;
        self.body.read(buffer)
    }

    pub(crate) fn copy_from(&mut self, source: &Message) {
        self.header = source.header;
        self.body.clone_from(&source.body);
    }

    pub(crate) fn reset(&mut self) {
        self.header = MessageHeader::new(self.header.message_type);
        self.body.reset();
    }
}
