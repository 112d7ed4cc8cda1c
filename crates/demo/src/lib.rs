//! Avatar world shared by the `strand-server` and `strand-client` demos.

pub mod input;
pub mod world;

pub use input::{AvatarInput, InputFlags};
pub use world::{AVATAR_ENTITY_TYPE, Avatar, AvatarState, DemoWorld};
