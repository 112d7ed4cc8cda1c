pub mod buffer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod metrics;
pub mod packet;
pub mod peer;
pub mod replication;
pub mod sequence;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod time;

pub use buffer::{Buffer, BufferError};
pub use channel::{ChannelError, ChannelType, TransmissionChannel};
pub use config::{DEFAULT_PORT, NetworkConfig};
pub use connection::{ConnectionError, ConnectionFailedReason, DeniedConnection};
pub use error::NetError;
pub use message::{Message, MessageBody, MessageFactory, MessageFlags, MessageType};
pub use metrics::{ChannelMetrics, NetworkStats};
pub use packet::{DEFAULT_MTU, NetworkPacket, PacketError};
pub use peer::{RemotePeer, RemotePeersHandler};
pub use replication::{
    NetworkEntityCreateConfig, NetworkEntitySerializer, NetworkEntitySpawn, NetworkWorld,
    ReplicationAction, ReplicationError, ReplicationManager, ReplicationMessagesProcessor,
};
pub use session::{Client, ClientEvent, ClientState, DisconnectReason, Server, ServerEvent};
pub use simulator::{ConditionedSocket, PacketLossSimulation, SimulatedNetwork, SimulatedSocket};
pub use socket::{DatagramSocket, UdpDatagramSocket};
pub use time::{TimeClock, TimeSyncer};
