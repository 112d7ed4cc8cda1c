use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glam::Vec3;
use strand::{
    Buffer, BufferError, NetworkEntityCreateConfig, NetworkEntitySerializer, NetworkEntitySpawn,
    NetworkWorld,
};

use crate::input::{AvatarInput, InputFlags};

pub const AVATAR_ENTITY_TYPE: u32 = 1;

const WALK_SPEED: f32 = 5.0;
const SPRINT_SPEED: f32 = 10.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvatarState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub last_input_sequence: u32,
}

/// Owners also receive velocity and the last applied input sequence so they
/// can reconcile local prediction; everyone else only gets the position.
#[derive(Debug, Clone, Default)]
struct AvatarSerializer(Rc<RefCell<AvatarState>>);

impl NetworkEntitySerializer for AvatarSerializer {
    fn serialize_for_owner(&self, buffer: &mut Buffer) -> Result<(), BufferError> {
        let state = self.0.borrow();
        buffer.write_vec3(state.position)?;
        buffer.write_vec3(state.velocity)?;
        buffer.write_u32(state.last_input_sequence)
    }

    fn serialize_for_non_owner(&self, buffer: &mut Buffer) -> Result<(), BufferError> {
        buffer.write_vec3(self.0.borrow().position)
    }

    fn deserialize_for_owner(&mut self, buffer: &mut Buffer) -> Result<(), BufferError> {
        let position = buffer.read_vec3()?;
        let velocity = buffer.read_vec3()?;
        let last_input_sequence = buffer.read_u32()?;
        *self.0.borrow_mut() = AvatarState {
            position,
            velocity,
            last_input_sequence,
        };
        Ok(())
    }

    fn deserialize_for_non_owner(&mut self, buffer: &mut Buffer) -> Result<(), BufferError> {
        self.0.borrow_mut().position = buffer.read_vec3()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Avatar {
    pub network_entity_id: u32,
    pub entity_type: u32,
    pub controlled_by_peer_id: u32,
    state: Rc<RefCell<AvatarState>>,
}

impl Avatar {
    pub fn state(&self) -> AvatarState {
        *self.state.borrow()
    }
}

/// Game side of the demo: one avatar per network entity, keyed by in-game id.
/// Used unchanged by the demo server and the demo client.
#[derive(Debug, Default)]
pub struct DemoWorld {
    next_in_game_id: u32,
    avatars: HashMap<u32, Avatar>,
}

impl DemoWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> {
        self.avatars.values()
    }

    pub fn avatar_controlled_by(&self, peer_id: u32) -> Option<&Avatar> {
        self.avatars
            .values()
            .find(|a| a.controlled_by_peer_id == peer_id)
    }

    /// Moves the avatar owned by `peer_id`. Inputs older than the last one
    /// applied are ignored. Returns whether the input was applied.
    pub fn apply_input(&mut self, peer_id: u32, input: &AvatarInput, dt: f32) -> bool {
        let Some(avatar) = self
            .avatars
            .values()
            .find(|a| a.controlled_by_peer_id == peer_id)
        else {
            log::debug!("Input from peer {} without an avatar", peer_id);
            return false;
        };

        let mut state = avatar.state.borrow_mut();
        if input.sequence <= state.last_input_sequence && state.last_input_sequence != 0 {
            return false;
        }
        state.last_input_sequence = input.sequence;

        let speed = if input.flags.contains(InputFlags::SPRINT) {
            SPRINT_SPEED
        } else {
            WALK_SPEED
        };

        let move_vec = Vec3::from_array(input.move_direction);
        if move_vec.length_squared() > 0.001 {
            state.velocity = move_vec.normalize() * speed;
            let velocity = state.velocity;
            state.position += velocity * dt;
        } else {
            state.velocity = Vec3::ZERO;
        }
        true
    }
}

impl NetworkWorld for DemoWorld {
    fn on_network_entity_create(
        &mut self,
        config: &NetworkEntityCreateConfig,
    ) -> Option<NetworkEntitySpawn> {
        if config.entity_type != AVATAR_ENTITY_TYPE {
            log::warn!("Unknown entity type {}", config.entity_type);
            return None;
        }

        self.next_in_game_id += 1;
        let state = Rc::new(RefCell::new(AvatarState {
            position: config.position,
            ..Default::default()
        }));
        self.avatars.insert(
            self.next_in_game_id,
            Avatar {
                network_entity_id: config.network_entity_id,
                entity_type: config.entity_type,
                controlled_by_peer_id: config.controlled_by_peer_id,
                state: Rc::clone(&state),
            },
        );
        log::debug!(
            "Avatar {} spawned for peer {} at {}",
            config.network_entity_id,
            config.controlled_by_peer_id,
            config.position
        );

        Some(NetworkEntitySpawn {
            in_game_id: self.next_in_game_id,
            serializer: Box::new(AvatarSerializer(state)),
        })
    }

    fn on_network_entity_destroy(&mut self, in_game_id: u32) {
        if let Some(avatar) = self.avatars.remove(&in_game_id) {
            log::debug!("Avatar {} despawned", avatar.network_entity_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(world: &mut DemoWorld, peer_id: u32) -> NetworkEntitySpawn {
        world
            .on_network_entity_create(&NetworkEntityCreateConfig {
                network_entity_id: 10 + peer_id,
                entity_type: AVATAR_ENTITY_TYPE,
                controlled_by_peer_id: peer_id,
                position: Vec3::ZERO,
            })
            .unwrap()
    }

    #[test]
    fn test_input_moves_owned_avatar() {
        let mut world = DemoWorld::new();
        spawn(&mut world, 1);
        spawn(&mut world, 2);

        let input = AvatarInput {
            sequence: 1,
            move_direction: [1.0, 0.0, 0.0],
            flags: InputFlags::SPRINT,
        };
        assert!(world.apply_input(1, &input, 0.5));
        assert!(!world.apply_input(1, &input, 0.5));

        let moved = world.avatar_controlled_by(1).unwrap().state();
        assert_eq!(moved.position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(world.avatar_controlled_by(2).unwrap().state().position, Vec3::ZERO);
        assert!(!world.apply_input(3, &input, 0.5));
    }

    #[test]
    fn test_owner_state_carries_more_than_non_owner() {
        let mut world = DemoWorld::new();
        let spawn = spawn(&mut world, 1);

        let mut owner = Buffer::new(64);
        spawn.serializer.serialize_for_owner(&mut owner).unwrap();
        let mut other = Buffer::new(64);
        spawn.serializer.serialize_for_non_owner(&mut other).unwrap();
        assert_eq!(owner.len(), 28);
        assert_eq!(other.len(), 12);
    }

    #[test]
    fn test_unknown_entity_type_is_refused() {
        let mut world = DemoWorld::new();
        let refused = world.on_network_entity_create(&NetworkEntityCreateConfig {
            network_entity_id: 1,
            entity_type: 99,
            controlled_by_peer_id: 0,
            position: Vec3::ZERO,
        });
        assert!(refused.is_none());
        assert!(world.is_empty());
    }
}
