use super::{ConnectionFailedReason, ConnectionPipeline, PendingConnection, PendingConnectionState};
use crate::message::{
    ConnectionAcceptedMessage, ConnectionChallengeMessage, Message, MessageBody, MessageFactory,
    MessageType,
};

/// Server side of the handshake: challenge every request, then accept or deny
/// depending on whether the echoed prefix matches.
#[derive(Debug)]
pub struct ServerConnectionPipeline {
    next_approved_id: u16,
    rng: fastrand::Rng,
}

impl Default for ServerConnectionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConnectionPipeline {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    pub fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            next_approved_id: 1,
            rng,
        }
    }

    /// Peer ids are handed out in order, wrap at `u16::MAX` and never use 0.
    fn approve_next_id(&mut self) -> u16 {
        let id = self.next_approved_id;
        self.next_approved_id = match id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }

    fn send_challenge(connection: &mut PendingConnection, factory: &mut MessageFactory) {
        let client_salt = connection.client_salt();
        let server_salt = connection.server_salt();
        connection.send_message(MessageType::ConnectionChallenge, factory, |body| {
            if let MessageBody::ConnectionChallenge(challenge) = body {
                *challenge = ConnectionChallengeMessage {
                    client_salt,
                    server_salt,
                };
            }
        });
    }
}

/// Re-sends ConnectionAccepted with the given credentials. Also used when an
/// already-promoted peer repeats its challenge response.
pub(crate) fn fill_accepted(body: &mut MessageBody, data_prefix: u64, client_id: u16) {
    if let MessageBody::ConnectionAccepted(accepted) = body {
        *accepted = ConnectionAcceptedMessage {
            data_prefix,
            client_id,
        };
    }
}

impl ConnectionPipeline for ServerConnectionPipeline {
    fn accepts_incoming_connections(&self) -> bool {
        true
    }

    fn process_connection_message(
        &mut self,
        connection: &mut PendingConnection,
        message: &Message,
        factory: &mut MessageFactory,
    ) {
        match (message.body(), connection.state()) {
            (
                MessageBody::ConnectionRequest(request),
                PendingConnectionState::Initializing | PendingConnectionState::ConnectionChallenge,
            ) => {
                if connection.client_salt() != request.client_salt {
                    if connection.client_salt() != 0 {
                        log::debug!(
                            "{} restarted its handshake with a new salt",
                            connection.address()
                        );
                    }
                    connection.set_client_salt(request.client_salt);
                }
                if connection.server_salt() == 0 {
                    connection.set_server_salt(self.rng.u64(1..));
                }
                connection.set_state(PendingConnectionState::ConnectionChallenge);
                Self::send_challenge(connection, factory);
            }
            (
                MessageBody::ConnectionChallengeResponse(response),
                PendingConnectionState::ConnectionChallenge,
            ) => {
                if response.data_prefix != connection.data_prefix() {
                    connection.fail(ConnectionFailedReason::WrongChallengeResponse);
                    connection.send_denied(ConnectionFailedReason::WrongChallengeResponse, factory);
                    return;
                }

                let client_id = self.approve_next_id();
                let data_prefix = connection.data_prefix();
                connection.set_client_id(client_id);
                connection.set_state(PendingConnectionState::Completed);
                connection.send_message(MessageType::ConnectionAccepted, factory, |body| {
                    fill_accepted(body, data_prefix, client_id)
                });
            }
            (_, state) => {
                log::debug!(
                    "Ignoring {:?} from {} while {:?}",
                    message.message_type(),
                    connection.address(),
                    state
                );
            }
        }
    }

    fn update(&mut self, _connection: &mut PendingConnection, _dt: f32, _factory: &mut MessageFactory) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approved_ids_skip_zero() {
        let mut pipeline = ServerConnectionPipeline::with_rng(fastrand::Rng::with_seed(1));
        assert_eq!(pipeline.approve_next_id(), 1);
        assert_eq!(pipeline.approve_next_id(), 2);

        pipeline.next_approved_id = u16::MAX;
        assert_eq!(pipeline.approve_next_id(), u16::MAX);
        assert_eq!(pipeline.approve_next_id(), 1);
    }
}
