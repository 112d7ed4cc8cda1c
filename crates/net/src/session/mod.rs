//! Top-level endpoints. [`Server`] and [`Client`] own the message factory,
//! clock, peers and handshake state and advance all of it from `tick(dt)`.

mod client;
mod events;
mod server;

pub use client::{Client, ClientState};
pub use events::{ClientEvent, DisconnectReason, ServerEvent};
pub use server::Server;

use crate::buffer::Buffer;
use crate::error::NetError;
use crate::message::{MessageBody, MessageFactory, MessageType};
use crate::packet::NetworkPacket;
use crate::peer::RemotePeer;
use crate::socket::DatagramSocket;

/// Queues a Disconnection carrying the peer's data prefix and flushes the
/// peer immediately, since it is about to be reset.
fn send_disconnection(
    peer: &mut RemotePeer,
    socket: &mut dyn DatagramSocket,
    factory: &mut MessageFactory,
) -> Result<(), NetError> {
    let data_prefix = peer.data_prefix();
    let mut message = factory.lend_message(MessageType::Disconnection);
    if let MessageBody::Disconnection(disconnection) = message.body_mut() {
        disconnection.data_prefix = data_prefix;
    }
    peer.add_message(message, factory)?;
    peer.send_data(socket, factory)
}

/// Parses one datagram. Malformed input is logged and dropped.
fn parse_packet(
    data: &[u8],
    from: std::net::SocketAddr,
    factory: &mut MessageFactory,
    mtu: usize,
) -> Option<NetworkPacket> {
    let mut buffer = Buffer::from_bytes(data);
    match NetworkPacket::read(&mut buffer, factory, mtu) {
        Ok(packet) => Some(packet),
        Err(e) => {
            log::debug!("Dropping malformed packet from {}: {}", from, e);
            None
        }
    }
}
