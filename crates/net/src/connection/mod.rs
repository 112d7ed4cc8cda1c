mod client_pipeline;
mod manager;
mod pending;
mod server_pipeline;

use std::fmt;
use std::net::SocketAddr;

use crate::message::{Message, MessageFactory};

pub use client_pipeline::ClientConnectionPipeline;
pub use manager::{DeniedConnection, MAX_DENIED_CONNECTIONS, PendingConnectionsManager};
pub use pending::{PendingConnection, PendingConnectionState};
pub use server_pipeline::ServerConnectionPipeline;
pub(crate) use server_pipeline::fill_accepted;

/// Why a handshake ended without a connection. Carried on the wire by
/// ConnectionDenied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionFailedReason {
    #[default]
    Unknown = 0,
    ServerFull = 1,
    Timeout = 2,
    WrongChallengeResponse = 3,
}

impl ConnectionFailedReason {
    /// Values this build does not know decode as `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ServerFull,
            2 => Self::Timeout,
            3 => Self::WrongChallengeResponse,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::ServerFull => "server full",
            Self::Timeout => "timed out",
            Self::WrongChallengeResponse => "wrong challenge response",
        }
    }
}

impl fmt::Display for ConnectionFailedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connections initiated by this endpoint are not allowed ({0})")]
    LocalConnectionsNotAllowed(SocketAddr),
    #[error("a connection to {0} is already pending")]
    AlreadyPending(SocketAddr),
    #[error("{0} is already connected")]
    AlreadyConnected(SocketAddr),
    #[error("too many pending connections")]
    TooManyPendingConnections,
    #[error("no free remote peer slot")]
    NoFreeSlot,
    #[error("not connected")]
    NotConnected,
}

/// One side of the handshake. The client and server pipelines drive the same
/// [`PendingConnection`] state machine from opposite ends.
pub trait ConnectionPipeline {
    fn accepts_incoming_connections(&self) -> bool;

    fn process_connection_message(
        &mut self,
        connection: &mut PendingConnection,
        message: &Message,
        factory: &mut MessageFactory,
    );

    fn update(&mut self, connection: &mut PendingConnection, dt: f32, factory: &mut MessageFactory);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_from_unknown_byte() {
        assert_eq!(ConnectionFailedReason::from_u8(2), ConnectionFailedReason::Timeout);
        assert_eq!(ConnectionFailedReason::from_u8(200), ConnectionFailedReason::Unknown);
        assert_eq!(ConnectionFailedReason::ServerFull.to_string(), "server full");
    }
}
