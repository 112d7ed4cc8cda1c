use std::time::Duration;

use strand::{NetworkConfig, PacketLossSimulation};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub tick_rate: u32,
    pub network: NetworkConfig,
    pub packet_loss: Option<PacketLossSimulation>,
    pub run_for: Option<Duration>,
    pub report_interval_seconds: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            network: NetworkConfig::client(),
            packet_loss: None,
            run_for: None,
            report_interval_seconds: 2.0,
        }
    }
}
