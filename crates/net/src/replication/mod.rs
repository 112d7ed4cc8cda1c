//! Entity lifecycle replication.
//!
//! The server side ([`ReplicationManager`]) owns the authoritative entity set
//! and turns spawns, removals and per-tick state into Replication messages.
//! The client side ([`ReplicationMessagesProcessor`]) applies them to the
//! local world. Both reach the game layer through [`NetworkWorld`] and the
//! per-entity [`NetworkEntitySerializer`].

mod manager;
mod processor;
mod storage;

use glam::Vec3;

use crate::buffer::{Buffer, BufferError};
use crate::message::MessageType;

pub use manager::ReplicationManager;
pub use processor::ReplicationMessagesProcessor;
pub use storage::{NetworkEntityData, NetworkEntityStorage};

pub const INVALID_NETWORK_ENTITY_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ReplicationAction {
    #[default]
    Create = 0,
    Update = 1,
    Destroy = 2,
}

impl ReplicationAction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Create),
            1 => Some(Self::Update),
            2 => Some(Self::Destroy),
            _ => None,
        }
    }
}

/// Game-side state codec for one entity. Owners usually receive more detail
/// (for reconciliation) than everyone else.
pub trait NetworkEntitySerializer {
    fn serialize_for_owner(&self, buffer: &mut Buffer) -> Result<(), BufferError>;

    fn serialize_for_non_owner(&self, buffer: &mut Buffer) -> Result<(), BufferError>;

    fn deserialize_for_owner(&mut self, buffer: &mut Buffer) -> Result<(), BufferError>;

    fn deserialize_for_non_owner(&mut self, buffer: &mut Buffer) -> Result<(), BufferError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkEntityCreateConfig {
    pub network_entity_id: u32,
    pub entity_type: u32,
    pub controlled_by_peer_id: u32,
    pub position: Vec3,
}

/// What the game layer hands back for a freshly created network entity.
pub struct NetworkEntitySpawn {
    pub in_game_id: u32,
    pub serializer: Box<dyn NetworkEntitySerializer>,
}

/// Hooks into the game layer.
pub trait NetworkWorld {
    /// Creates the game entity. `None` refuses the spawn.
    fn on_network_entity_create(
        &mut self,
        config: &NetworkEntityCreateConfig,
    ) -> Option<NetworkEntitySpawn>;

    fn on_network_entity_destroy(&mut self, in_game_id: u32);
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("world refused to spawn entity {network_entity_id} of type {entity_type}")]
    SpawnRejected {
        network_entity_id: u32,
        entity_type: u32,
    },
    #[error("{0:?} is not a replication message")]
    NotReplicationMessage(MessageType),
}
