use std::net::SocketAddr;

use crate::connection::ConnectionFailedReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    PeerConnected {
        peer_id: u16,
        address: SocketAddr,
    },
    PeerDisconnected {
        peer_id: u16,
        address: SocketAddr,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        address: SocketAddr,
        reason: ConnectionFailedReason,
    },
    InputsReceived {
        peer_id: u16,
        data: Vec<u8>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { peer_id: u16 },
    Disconnected { reason: DisconnectReason },
    ConnectionFailed { reason: ConnectionFailedReason },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    /// The same address opened a new session.
    Reconnected,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Reconnected => "reconnected",
        }
    }
}
