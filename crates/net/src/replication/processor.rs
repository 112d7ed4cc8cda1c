use std::collections::{HashSet, VecDeque};

use glam::Vec3;

use super::{
    NetworkEntityCreateConfig, NetworkEntityData, NetworkEntityStorage, NetworkWorld,
    ReplicationAction, ReplicationError,
};
use crate::buffer::Buffer;
use crate::message::{Message, MessageBody, ReplicationMessage};

/// How many destroyed ids are remembered to reject late UPDATEs.
pub const DESTROYED_ID_MEMORY: usize = 1024;

/// Client-side mirror of the server's entity set.
#[derive(Debug, Default)]
pub struct ReplicationMessagesProcessor {
    local_peer_id: u32,
    storage: NetworkEntityStorage,
    // UPDATEs ride the unreliable channel and can arrive after the DESTROY.
    destroyed: HashSet<u32>,
    destroyed_order: VecDeque<u32>,
}

impl ReplicationMessagesProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_peer_id(&self) -> u32 {
        self.local_peer_id
    }

    pub fn set_local_peer_id(&mut self, peer_id: u32) {
        self.local_peer_id = peer_id;
    }

    pub fn storage(&self) -> &NetworkEntityStorage {
        &self.storage
    }

    pub fn process_replication_message(
        &mut self,
        message: &Message,
        world: &mut dyn NetworkWorld,
    ) -> Result<(), ReplicationError> {
        let MessageBody::Replication(replication) = message.body() else {
            return Err(ReplicationError::NotReplicationMessage(message.message_type()));
        };

        match replication.action {
            ReplicationAction::Create => self.process_create(replication, world),
            ReplicationAction::Update => self.process_update(replication, world),
            ReplicationAction::Destroy => {
                self.process_destroy(replication.network_entity_id, world);
                Ok(())
            }
        }
    }

    fn process_create(
        &mut self,
        replication: &ReplicationMessage,
        world: &mut dyn NetworkWorld,
    ) -> Result<(), ReplicationError> {
        if self.storage.contains(replication.network_entity_id) {
            log::debug!(
                "Network entity {} already exists, ignoring create",
                replication.network_entity_id
            );
            return Ok(());
        }
        self.forget_destroyed(replication.network_entity_id);

        let position = if replication.data.len() >= 12 {
            Buffer::from_bytes(&replication.data).read_vec3()?
        } else {
            Vec3::ZERO
        };
        self.spawn(replication, position, world)
    }

    fn process_update(
        &mut self,
        replication: &ReplicationMessage,
        world: &mut dyn NetworkWorld,
    ) -> Result<(), ReplicationError> {
        if self.destroyed.contains(&replication.network_entity_id) {
            log::debug!(
                "Dropping stale update for destroyed network entity {}",
                replication.network_entity_id
            );
            return Ok(());
        }
        if !self.storage.contains(replication.network_entity_id) {
            log::debug!(
                "Update for unknown network entity {}, creating it",
                replication.network_entity_id
            );
            self.spawn(replication, Vec3::ZERO, world)?;
        }

        let local_peer_id = self.local_peer_id;
        let Some(entity) = self.storage.get_mut(replication.network_entity_id) else {
            return Ok(());
        };

        let mut buffer = Buffer::from_bytes(&replication.data);
        if entity.controlled_by_peer_id == local_peer_id {
            entity.serializer.deserialize_for_owner(&mut buffer)?;
        } else {
            entity.serializer.deserialize_for_non_owner(&mut buffer)?;
        }
        Ok(())
    }

    fn process_destroy(&mut self, network_entity_id: u32, world: &mut dyn NetworkWorld) {
        self.remember_destroyed(network_entity_id);
        match self.storage.remove(network_entity_id) {
            Some(entity) => world.on_network_entity_destroy(entity.in_game_id),
            None => log::debug!(
                "Network entity {} already destroyed",
                network_entity_id
            ),
        }
    }

    pub fn is_destroyed(&self, network_entity_id: u32) -> bool {
        self.destroyed.contains(&network_entity_id)
    }

    fn remember_destroyed(&mut self, network_entity_id: u32) {
        if !self.destroyed.insert(network_entity_id) {
            return;
        }
        self.destroyed_order.push_back(network_entity_id);
        if self.destroyed_order.len() > DESTROYED_ID_MEMORY {
            if let Some(oldest) = self.destroyed_order.pop_front() {
                self.destroyed.remove(&oldest);
            }
        }
    }

    fn forget_destroyed(&mut self, network_entity_id: u32) {
        if self.destroyed.remove(&network_entity_id) {
            self.destroyed_order.retain(|&id| id != network_entity_id);
        }
    }

    fn spawn(
        &mut self,
        replication: &ReplicationMessage,
        position: Vec3,
        world: &mut dyn NetworkWorld,
    ) -> Result<(), ReplicationError> {
        let config = NetworkEntityCreateConfig {
            network_entity_id: replication.network_entity_id,
            entity_type: replication.replicated_class_id,
            controlled_by_peer_id: replication.controlled_by_peer_id,
            position,
        };
        let spawn = world
            .on_network_entity_create(&config)
            .ok_or(ReplicationError::SpawnRejected {
                network_entity_id: config.network_entity_id,
                entity_type: config.entity_type,
            })?;

        self.storage.insert(NetworkEntityData {
            network_entity_id: config.network_entity_id,
            entity_type: config.entity_type,
            controlled_by_peer_id: config.controlled_by_peer_id,
            in_game_id: spawn.in_game_id,
            position,
            serializer: spawn.serializer,
        });
        Ok(())
    }

    /// Destroys every mirrored entity, e.g. after losing the server.
    pub fn clear(&mut self, world: &mut dyn NetworkWorld) {
        for entity in self.storage.drain() {
            world.on_network_entity_destroy(entity.in_game_id);
        }
        self.destroyed.clear();
        self.destroyed_order.clear();
    }
}
