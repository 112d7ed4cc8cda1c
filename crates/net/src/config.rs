use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_RELIABLE_INITIAL_TIMEOUT_SECONDS;
use crate::message::DEFAULT_INITIAL_POOL_SIZE;
use crate::packet::DEFAULT_MTU;

pub const DEFAULT_PORT: u16 = 27015;

/// Tunables shared by [`Server`](crate::Server) and [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub max_connections: usize,
    pub max_pending_connections: usize,
    pub connection_timeout_seconds: f32,
    /// Accept handshakes initiated by this endpoint. Servers normally refuse them.
    pub allow_local_connections: bool,
    pub mtu: usize,
    pub reliable_initial_timeout_seconds: f32,
    pub time_requests_frequency_seconds: f32,
    pub time_requests_burst_size: usize,
    pub initial_pool_size: usize,
    pub peer_inactivity_timeout_seconds: f32,
    pub keep_alive_interval_seconds: f32,
    pub connection_resend_interval_seconds: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            max_pending_connections: 16,
            connection_timeout_seconds: 5.0,
            allow_local_connections: false,
            mtu: DEFAULT_MTU,
            reliable_initial_timeout_seconds: DEFAULT_RELIABLE_INITIAL_TIMEOUT_SECONDS,
            time_requests_frequency_seconds: 1.0,
            time_requests_burst_size: 11,
            initial_pool_size: DEFAULT_INITIAL_POOL_SIZE,
            peer_inactivity_timeout_seconds: 10.0,
            keep_alive_interval_seconds: 1.0,
            connection_resend_interval_seconds: 0.2,
        }
    }
}

impl NetworkConfig {
    pub fn server() -> Self {
        Self::default()
    }

    pub fn client() -> Self {
        Self {
            max_connections: 1,
            max_pending_connections: 1,
            allow_local_connections: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_allows_local_connections() {
        assert!(!NetworkConfig::server().allow_local_connections);
        assert!(NetworkConfig::client().allow_local_connections);
        assert_eq!(NetworkConfig::client().mtu, 1500);
    }
}
