use std::net::SocketAddr;

use super::ConnectionFailedReason;
use crate::channel::{TransmissionChannel, UnreliableUnorderedTransmissionChannel};
use crate::error::NetError;
use crate::message::{
    ConnectionDeniedMessage, Message, MessageBody, MessageFactory, MessageType,
};
use crate::socket::DatagramSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingConnectionState {
    Initializing,
    ConnectionChallenge,
    Completed,
    Failed,
}

/// A handshake in progress with one address. Handshake traffic is unreliable
/// and unordered; lost messages are covered by client retries.
#[derive(Debug)]
pub struct PendingConnection {
    address: SocketAddr,
    state: PendingConnectionState,
    client_salt: u64,
    server_salt: u64,
    client_id: u16,
    failed_reason: ConnectionFailedReason,
    elapsed: f32,
    resend_timer: f32,
    channel: UnreliableUnorderedTransmissionChannel,
}

impl PendingConnection {
    pub fn new(address: SocketAddr, mtu: usize) -> Self {
        Self {
            address,
            state: PendingConnectionState::Initializing,
            client_salt: 0,
            server_salt: 0,
            client_id: 0,
            failed_reason: ConnectionFailedReason::Unknown,
            elapsed: 0.0,
            resend_timer: 0.0,
            channel: UnreliableUnorderedTransmissionChannel::new(mtu),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> PendingConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PendingConnectionState) {
        if self.state != state {
            log::debug!("Pending connection {}: {:?} -> {:?}", self.address, self.state, state);
        }
        self.state = state;
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            PendingConnectionState::Completed | PendingConnectionState::Failed
        )
    }

    pub fn client_salt(&self) -> u64 {
        self.client_salt
    }

    pub(crate) fn set_client_salt(&mut self, salt: u64) {
        self.client_salt = salt;
    }

    pub fn server_salt(&self) -> u64 {
        self.server_salt
    }

    pub(crate) fn set_server_salt(&mut self, salt: u64) {
        self.server_salt = salt;
    }

    pub fn data_prefix(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    pub(crate) fn set_client_id(&mut self, client_id: u16) {
        self.client_id = client_id;
    }

    pub fn failed_reason(&self) -> ConnectionFailedReason {
        self.failed_reason
    }

    pub(crate) fn fail(&mut self, reason: ConnectionFailedReason) {
        log::info!("Connection with {} failed: {}", self.address, reason);
        self.failed_reason = reason;
        self.set_state(PendingConnectionState::Failed);
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub(crate) fn advance(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    /// Returns true when the resend interval elapsed, restarting it.
    pub(crate) fn tick_resend_timer(&mut self, dt: f32, resend_interval: f32) -> bool {
        self.resend_timer += dt;
        if self.resend_timer >= resend_interval {
            self.resend_timer = 0.0;
            return true;
        }
        false
    }

    pub(crate) fn restart_resend_timer(&mut self) {
        self.resend_timer = 0.0;
    }

    /// Lends a message of `message_type`, lets `fill` write its payload, and
    /// queues it.
    pub(crate) fn send_message(
        &mut self,
        message_type: MessageType,
        factory: &mut MessageFactory,
        fill: impl FnOnce(&mut MessageBody),
    ) {
        let mut message = factory.lend_message(message_type);
        fill(message.body_mut());
        self.add_message(message, factory);
    }

    pub(crate) fn send_denied(&mut self, reason: ConnectionFailedReason, factory: &mut MessageFactory) {
        self.send_message(MessageType::ConnectionDenied, factory, |body| {
            if let MessageBody::ConnectionDenied(denied) = body {
                *denied = ConnectionDeniedMessage { reason };
            }
        });
    }

    pub fn add_message(&mut self, message: Box<Message>, factory: &mut MessageFactory) {
        if let Err(message) = self.channel.add_message_to_send(message) {
            factory.release_message(message);
        }
    }

    pub fn are_pending_messages_to_send(&self) -> bool {
        self.channel.are_pending_messages_to_send()
    }

    pub fn send_data(
        &mut self,
        socket: &mut dyn DatagramSocket,
        factory: &mut MessageFactory,
    ) -> Result<(), NetError> {
        while self.channel.are_pending_messages_to_send() {
            self.channel
                .create_and_send_packet(socket, self.address, factory)?;
        }
        Ok(())
    }

    pub fn reset(&mut self, factory: &mut MessageFactory) {
        self.channel.reset(factory);
    }
}
