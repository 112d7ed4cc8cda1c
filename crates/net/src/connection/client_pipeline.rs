use super::{ConnectionPipeline, PendingConnection, PendingConnectionState};
use crate::message::{
    ConnectionChallengeResponseMessage, ConnectionRequestMessage, Message, MessageBody,
    MessageFactory, MessageType,
};

/// Client side of the handshake: request, answer the challenge, wait for
/// the verdict. Both outgoing steps are retried until the server answers.
#[derive(Debug)]
pub struct ClientConnectionPipeline {
    resend_interval: f32,
    rng: fastrand::Rng,
}

impl ClientConnectionPipeline {
    pub fn new(resend_interval: f32) -> Self {
        Self::with_rng(resend_interval, fastrand::Rng::new())
    }

    pub fn with_rng(resend_interval: f32, rng: fastrand::Rng) -> Self {
        Self {
            resend_interval,
            rng,
        }
    }

    fn send_request(connection: &mut PendingConnection, factory: &mut MessageFactory) {
        let client_salt = connection.client_salt();
        connection.send_message(MessageType::ConnectionRequest, factory, |body| {
            if let MessageBody::ConnectionRequest(request) = body {
                *request = ConnectionRequestMessage { client_salt };
            }
        });
    }

    fn send_challenge_response(connection: &mut PendingConnection, factory: &mut MessageFactory) {
        let data_prefix = connection.data_prefix();
        connection.send_message(MessageType::ConnectionChallengeResponse, factory, |body| {
            if let MessageBody::ConnectionChallengeResponse(response) = body {
                *response = ConnectionChallengeResponseMessage { data_prefix };
            }
        });
    }
}

impl ConnectionPipeline for ClientConnectionPipeline {
    fn accepts_incoming_connections(&self) -> bool {
        false
    }

    fn process_connection_message(
        &mut self,
        connection: &mut PendingConnection,
        message: &Message,
        factory: &mut MessageFactory,
    ) {
        match (message.body(), connection.state()) {
            (MessageBody::ConnectionChallenge(challenge), PendingConnectionState::Initializing) => {
                if challenge.client_salt != connection.client_salt() {
                    log::warn!(
                        "Challenge from {} echoed the wrong client salt, ignoring",
                        connection.address()
                    );
                    return;
                }
                connection.set_server_salt(challenge.server_salt);
                connection.set_state(PendingConnectionState::ConnectionChallenge);
                connection.restart_resend_timer();
                Self::send_challenge_response(connection, factory);
            }
            (
                MessageBody::ConnectionAccepted(accepted),
                PendingConnectionState::ConnectionChallenge,
            ) => {
                if accepted.data_prefix != connection.data_prefix() {
                    log::warn!(
                        "ConnectionAccepted from {} carries a foreign prefix, ignoring",
                        connection.address()
                    );
                    return;
                }
                connection.set_client_id(accepted.client_id);
                connection.set_state(PendingConnectionState::Completed);
                log::info!(
                    "Connected to {} as peer {}",
                    connection.address(),
                    accepted.client_id
                );
            }
            (MessageBody::ConnectionDenied(denied), state)
                if state != PendingConnectionState::Completed =>
            {
                connection.fail(denied.reason);
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

    fn update(&mut self, connection: &mut PendingConnection, dt: f32, factory: &mut MessageFactory) {
        if connection.state() == PendingConnectionState::Initializing
            && connection.client_salt() == 0
        {
            connection.set_client_salt(self.rng.u64(1..));
            log::info!("Connecting to {}", connection.address());
            Self::send_request(connection, factory);
            return;
        }

        if !connection.tick_resend_timer(dt, self.resend_interval) {
            return;
        }
        match connection.state() {
            PendingConnectionState::Initializing => Self::send_request(connection, factory),
            PendingConnectionState::ConnectionChallenge => {
                Self::send_challenge_response(connection, factory)
            }
            PendingConnectionState::Completed | PendingConnectionState::Failed => {}
        }
    }
}
