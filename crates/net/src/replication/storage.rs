use std::collections::BTreeMap;
use std::fmt;

use glam::Vec3;

use super::NetworkEntitySerializer;

pub struct NetworkEntityData {
    pub network_entity_id: u32,
    pub entity_type: u32,
    pub controlled_by_peer_id: u32,
    pub in_game_id: u32,
    /// Position at creation, replayed to peers that join later.
    pub position: Vec3,
    pub serializer: Box<dyn NetworkEntitySerializer>,
}

impl fmt::Debug for NetworkEntityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkEntityData")
            .field("network_entity_id", &self.network_entity_id)
            .field("entity_type", &self.entity_type)
            .field("controlled_by_peer_id", &self.controlled_by_peer_id)
            .field("in_game_id", &self.in_game_id)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// Live network entities ordered by id.
#[derive(Debug, Default)]
pub struct NetworkEntityStorage {
    entities: BTreeMap<u32, NetworkEntityData>,
}

impl NetworkEntityStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, network_entity_id: u32) -> bool {
        self.entities.contains_key(&network_entity_id)
    }

    pub fn insert(&mut self, data: NetworkEntityData) {
        self.entities.insert(data.network_entity_id, data);
    }

    pub fn get(&self, network_entity_id: u32) -> Option<&NetworkEntityData> {
        self.entities.get(&network_entity_id)
    }

    pub fn get_mut(&mut self, network_entity_id: u32) -> Option<&mut NetworkEntityData> {
        self.entities.get_mut(&network_entity_id)
    }

    pub fn remove(&mut self, network_entity_id: u32) -> Option<NetworkEntityData> {
        self.entities.remove(&network_entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkEntityData> {
        self.entities.values()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.entities.keys().copied().collect()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = NetworkEntityData> + '_ {
        std::mem::take(&mut self.entities).into_values()
    }
}
