use std::time::Duration;

use strand::{NetworkConfig, PacketLossSimulation};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub network: NetworkConfig,
    pub global_packet_loss: Option<PacketLossSimulation>,
    /// Stop after this long; run forever when unset.
    pub run_for: Option<Duration>,
    pub stats_interval_seconds: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            network: NetworkConfig::server(),
            global_packet_loss: None,
            run_for: None,
            stats_interval_seconds: 5.0,
        }
    }
}
