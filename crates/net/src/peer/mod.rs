mod handler;
mod remote_peer;

pub use handler::RemotePeersHandler;
pub use remote_peer::{MAX_PACKETS_PER_CHANNEL_PER_TICK, RemotePeer};
