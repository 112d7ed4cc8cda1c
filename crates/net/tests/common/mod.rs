#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;

use glam::Vec3;
use strand::{
    Buffer, BufferError, NetworkEntityCreateConfig, NetworkEntitySerializer, NetworkEntitySpawn,
    NetworkWorld,
};

/// Routes library logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Position shared between the world and the replication layer.
#[derive(Debug, Clone, Default)]
pub struct SharedPosition(pub Rc<RefCell<Vec3>>);

impl SharedPosition {
    pub fn get(&self) -> Vec3 {
        *self.0.borrow()
    }

    pub fn set(&self, position: Vec3) {
        *self.0.borrow_mut() = position;
    }
}

impl NetworkEntitySerializer for SharedPosition {
    fn serialize_for_owner(&self, buffer: &mut Buffer) -> Result<(), BufferError> {
        buffer.write_vec3(self.get())
    }

    fn serialize_for_non_owner(&self, buffer: &mut Buffer) -> Result<(), BufferError> {
        buffer.write_vec3(self.get())
    }

    fn deserialize_for_owner(&mut self, buffer: &mut Buffer) -> Result<(), BufferError> {
        let position = buffer.read_vec3()?;
        self.set(position);
        Ok(())
    }

    fn deserialize_for_non_owner(&mut self, buffer: &mut Buffer) -> Result<(), BufferError> {
        let position = buffer.read_vec3()?;
        self.set(position);
        Ok(())
    }
}

#[derive(Debug)]
pub struct WorldEntity {
    pub config: NetworkEntityCreateConfig,
    pub position: SharedPosition,
}

/// Records every spawn and despawn, keyed by in-game id.
#[derive(Debug, Default)]
pub struct RecordingWorld {
    next_in_game_id: u32,
    pub entities: HashMap<u32, WorldEntity>,
    pub destroyed: Vec<u32>,
}

impl RecordingWorld {
    pub fn by_network_id(&self, network_entity_id: u32) -> Option<&WorldEntity> {
        self.entities
            .values()
            .find(|e| e.config.network_entity_id == network_entity_id)
    }

    pub fn position_of(&self, network_entity_id: u32) -> Option<Vec3> {
        self.by_network_id(network_entity_id)
            .map(|e| e.position.get())
    }
}

impl NetworkWorld for RecordingWorld {
    fn on_network_entity_create(
        &mut self,
        config: &NetworkEntityCreateConfig,
    ) -> Option<NetworkEntitySpawn> {
        self.next_in_game_id += 1;
        let position = SharedPosition::default();
        position.set(config.position);
        self.entities.insert(
            self.next_in_game_id,
            WorldEntity {
                config: *config,
                position: position.clone(),
            },
        );
        Some(NetworkEntitySpawn {
            in_game_id: self.next_in_game_id,
            serializer: Box::new(position),
        })
    }

    fn on_network_entity_destroy(&mut self, in_game_id: u32) {
        self.entities.remove(&in_game_id);
        self.destroyed.push(in_game_id);
    }
}
