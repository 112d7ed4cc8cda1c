use glam::Vec3;

use super::{
    INVALID_NETWORK_ENTITY_ID, NetworkEntityCreateConfig, NetworkEntityData,
    NetworkEntityStorage, NetworkWorld, ReplicationAction, ReplicationError,
};
use crate::buffer::Buffer;
use crate::message::{
    Message, MessageBody, MessageFactory, MessageFlags, MessageHeader, MessageType,
    ReplicationMessage,
};
use crate::packet::NetworkPacketHeader;
use crate::peer::RemotePeer;

/// Server-side owner of every network entity.
///
/// Spawns and removals are queued as reliable CREATE / DESTROY messages that
/// `server_replicate_world_state` copies to each peer; entity state goes out
/// every tick as an unreliable ordered UPDATE.
#[derive(Debug)]
pub struct ReplicationManager {
    next_network_entity_id: u32,
    storage: NetworkEntityStorage,
    pending: Vec<Box<Message>>,
    scratch: Buffer,
}

impl ReplicationManager {
    pub fn new(mtu: usize) -> Self {
        let capacity = mtu.saturating_sub(
            NetworkPacketHeader::SIZE + MessageHeader::SIZE + ReplicationMessage::FIXED_SIZE,
        );
        Self {
            next_network_entity_id: 1,
            storage: NetworkEntityStorage::new(),
            pending: Vec::new(),
            scratch: Buffer::new(capacity),
        }
    }

    pub fn storage(&self) -> &NetworkEntityStorage {
        &self.storage
    }

    pub fn entity(&self, network_entity_id: u32) -> Option<&NetworkEntityData> {
        self.storage.get(network_entity_id)
    }

    pub fn pending_message_count(&self) -> usize {
        self.pending.len()
    }

    fn allocate_network_entity_id(&mut self) -> u32 {
        loop {
            let id = self.next_network_entity_id;
            self.next_network_entity_id = match id.wrapping_add(1) {
                INVALID_NETWORK_ENTITY_ID => 1,
                next => next,
            };
            if !self.storage.contains(id) {
                return id;
            }
        }
    }

    /// Spawns a network entity through `world` and queues its CREATE.
    pub fn create_network_entity(
        &mut self,
        world: &mut dyn NetworkWorld,
        entity_type: u32,
        controlled_by_peer_id: u32,
        position: Vec3,
        factory: &mut MessageFactory,
    ) -> Result<u32, ReplicationError> {
        let network_entity_id = self.allocate_network_entity_id();
        let config = NetworkEntityCreateConfig {
            network_entity_id,
            entity_type,
            controlled_by_peer_id,
            position,
        };
        let spawn = world
            .on_network_entity_create(&config)
            .ok_or(ReplicationError::SpawnRejected {
                network_entity_id,
                entity_type,
            })?;

        let data = NetworkEntityData {
            network_entity_id,
            entity_type,
            controlled_by_peer_id,
            in_game_id: spawn.in_game_id,
            position,
            serializer: spawn.serializer,
        };
        let create = create_message(&data, factory)?;
        self.storage.insert(data);
        self.pending.push(create);

        log::debug!(
            "Network entity {} (type {}) created for peer {}",
            network_entity_id,
            entity_type,
            controlled_by_peer_id
        );
        Ok(network_entity_id)
    }

    /// Destroys the entity and queues its DESTROY. Unknown ids are ignored.
    pub fn remove_network_entity(
        &mut self,
        world: &mut dyn NetworkWorld,
        network_entity_id: u32,
        factory: &mut MessageFactory,
    ) {
        let Some(data) = self.storage.remove(network_entity_id) else {
            log::warn!(
                "Tried to remove unknown network entity {}",
                network_entity_id
            );
            return;
        };
        world.on_network_entity_destroy(data.in_game_id);

        let mut destroy = factory.lend_message(MessageType::Replication);
        destroy.set_flags(MessageFlags::RELIABLE | MessageFlags::ORDERED);
        if let MessageBody::Replication(replication) = destroy.body_mut() {
            replication.action = ReplicationAction::Destroy;
            replication.network_entity_id = network_entity_id;
            replication.controlled_by_peer_id = data.controlled_by_peer_id;
            replication.replicated_class_id = data.entity_type;
        }
        self.pending.push(destroy);
        log::debug!("Network entity {} removed", network_entity_id);
    }

    /// Removes every entity controlled by `peer_id`.
    pub fn remove_entities_controlled_by(
        &mut self,
        world: &mut dyn NetworkWorld,
        peer_id: u32,
        factory: &mut MessageFactory,
    ) {
        let owned: Vec<u32> = self
            .storage
            .iter()
            .filter(|e| e.controlled_by_peer_id == peer_id)
            .map(|e| e.network_entity_id)
            .collect();
        for network_entity_id in owned {
            self.remove_network_entity(world, network_entity_id, factory);
        }
    }

    /// Queues this tick's replication traffic for one peer: a copy of every
    /// pending CREATE / DESTROY, then one UPDATE per live entity.
    pub fn server_replicate_world_state(
        &mut self,
        peer: &mut RemotePeer,
        factory: &mut MessageFactory,
    ) {
        for message in &self.pending {
            let copy = factory.lend_copy(message);
            if let Err(e) = peer.add_message(copy, factory) {
                log::error!("Peer {}: replication message dropped: {}", peer.id(), e);
            }
        }

        let peer_id = u32::from(peer.id());
        for entity in self.storage.iter() {
            self.scratch.clear();
            let serialized = if entity.controlled_by_peer_id == peer_id {
                entity.serializer.serialize_for_owner(&mut self.scratch)
            } else {
                entity.serializer.serialize_for_non_owner(&mut self.scratch)
            };
            if let Err(e) = serialized {
                log::error!(
                    "Network entity {} state does not fit an update: {}",
                    entity.network_entity_id,
                    e
                );
                continue;
            }

            let mut update = factory.lend_message(MessageType::Replication);
            update.set_flags(MessageFlags::ORDERED);
            if let MessageBody::Replication(replication) = update.body_mut() {
                replication.action = ReplicationAction::Update;
                replication.network_entity_id = entity.network_entity_id;
                replication.controlled_by_peer_id = entity.controlled_by_peer_id;
                replication.replicated_class_id = entity.entity_type;
                replication.data.extend_from_slice(self.scratch.as_bytes());
            }
            if let Err(e) = peer.add_message(update, factory) {
                log::error!("Peer {}: update dropped: {}", peer.id(), e);
            }
        }
    }

    /// Sends CREATE for every live entity to a peer that just joined.
    pub fn replicate_existing_entities(&self, peer: &mut RemotePeer, factory: &mut MessageFactory) {
        for entity in self.storage.iter() {
            match create_message(entity, factory) {
                Ok(create) => {
                    if let Err(e) = peer.add_message(create, factory) {
                        log::error!("Peer {}: create dropped: {}", peer.id(), e);
                    }
                }
                Err(e) => log::error!("Network entity {}: {}", entity.network_entity_id, e),
            }
        }
    }

    /// Releases the CREATE / DESTROY messages every peer has now been given.
    pub fn clear_sent_replication_messages(&mut self, factory: &mut MessageFactory) {
        factory.release_all(self.pending.drain(..));
    }

    pub fn clear(&mut self, world: &mut dyn NetworkWorld, factory: &mut MessageFactory) {
        for entity in self.storage.drain() {
            world.on_network_entity_destroy(entity.in_game_id);
        }
        self.clear_sent_replication_messages(factory);
    }
}

fn create_message(
    entity: &NetworkEntityData,
    factory: &mut MessageFactory,
) -> Result<Box<Message>, ReplicationError> {
    let mut position = Buffer::new(12);
    position.write_vec3(entity.position)?;

    let mut create = factory.lend_message(MessageType::Replication);
    create.set_flags(MessageFlags::RELIABLE | MessageFlags::ORDERED);
    if let MessageBody::Replication(replication) = create.body_mut() {
        replication.action = ReplicationAction::Create;
        replication.network_entity_id = entity.network_entity_id;
        replication.controlled_by_peer_id = entity.controlled_by_peer_id;
        replication.replicated_class_id = entity.entity_type;
        replication.data.extend_from_slice(position.as_bytes());
    }
    Ok(create)
}
