use crate::buffer::BufferError;
use crate::channel::ChannelError;
use crate::connection::ConnectionError;
use crate::message::MessageError;
use crate::packet::PacketError;
use crate::replication::ReplicationError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Replication(#[from] ReplicationError),
}
