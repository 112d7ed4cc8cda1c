mod common;

use common::addr;
use strand::channel::DEFAULT_RELIABLE_INITIAL_TIMEOUT_SECONDS;
use strand::{
    Buffer, DatagramSocket, DEFAULT_MTU, Message, MessageBody, MessageFactory, MessageFlags,
    MessageType, NetworkConfig, NetworkPacket, PacketLossSimulation, RemotePeer,
    SimulatedNetwork, SimulatedSocket, TransmissionChannel,
};

const DT: f32 = 0.05;
const MAX_ROUNDS: usize = 400;
/// Send attempts allowed before five batched reliable messages must be through
/// at 30% loss each way. A round fails with probability about 0.51.
const MAX_SEND_ATTEMPTS: u64 = 12;

fn reliable_inputs(factory: &mut MessageFactory, payload: u8) -> Box<Message> {
    let mut message = factory.lend_message(MessageType::Inputs);
    message.set_flags(MessageFlags::RELIABLE | MessageFlags::ORDERED);
    if let MessageBody::Inputs(inputs) = message.body_mut() {
        inputs.data.push(payload);
    }
    message
}

fn pump(socket: &mut SimulatedSocket, peer: &mut RemotePeer, factory: &mut MessageFactory) {
    let mut data = [0u8; DEFAULT_MTU];
    while let Some((size, _)) = socket.recv_from(&mut data).unwrap() {
        let mut buffer = Buffer::from_bytes(&data[..size]);
        let packet = NetworkPacket::read(&mut buffer, factory, DEFAULT_MTU).unwrap();
        peer.process_packet(packet, size, factory);
    }
}

fn drain_inputs(peer: &mut RemotePeer, factory: &mut MessageFactory, out: &mut Vec<u8>) {
    while let Some(message) = peer.get_pending_ready_to_process_message() {
        if let MessageBody::Inputs(inputs) = message.body() {
            out.extend_from_slice(&inputs.data);
        }
        factory.release_message(message);
    }
}

#[test]
fn test_reliable_ordered_under_loss_and_jitter() {
    let conditions = PacketLossSimulation {
        enabled: true,
        loss_percent: 30.0,
        min_latency_ms: 10,
        max_latency_ms: 10,
        jitter_ms: 100,
    };
    let network = SimulatedNetwork::new(conditions.clone(), 42);
    let mut socket_a = network.bind(addr(1));
    let mut socket_b = network.bind(addr(2));
    let config = NetworkConfig::default();
    let mut factory = MessageFactory::new(16);

    let mut a = RemotePeer::new(addr(2), 1, 3, 4, &config);
    let mut b = RemotePeer::new(addr(1), 2, 3, 4, &config);

    for payload in 0..5 {
        a.add_message(reliable_inputs(&mut factory, payload), &mut factory)
            .unwrap();
    }

    let mut received = Vec::new();
    let mut rounds = 0;
    while received.len() < 5 || a.reliable_ordered().unacked_count() > 0 {
        assert!(rounds < MAX_ROUNDS, "delivery did not finish, got {:?}", received);
        rounds += 1;

        a.update(DT, &mut factory);
        b.update(DT, &mut factory);
        a.send_data(&mut socket_a, &mut factory).unwrap();
        b.send_data(&mut socket_b, &mut factory).unwrap();
        network.advance(DT);
        pump(&mut socket_a, &mut a, &mut factory);
        pump(&mut socket_b, &mut b, &mut factory);
        drain_inputs(&mut b, &mut factory, &mut received);
        drain_inputs(&mut a, &mut factory, &mut Vec::new());
    }

    assert_eq!(received, vec![0, 1, 2, 3, 4]);
    assert_eq!(b.reliable_ordered().metrics().messages_received, 5);

    // Each resend round waits for the retransmission timeout, which is the
    // initial timeout unless twice the worst round trip is longer.
    let worst_rtt = 2.0 * (conditions.max_latency_ms + conditions.jitter_ms) as f32 / 1000.0
        + 2.0 * DT;
    let timeout = DEFAULT_RELIABLE_INITIAL_TIMEOUT_SECONDS.max(2.0 * worst_rtt);
    let round_bound = timeout + worst_rtt + DT;
    let elapsed = rounds as f32 * DT;
    assert!(
        elapsed <= MAX_SEND_ATTEMPTS as f32 * round_bound,
        "took {:.2}s for {} resends",
        elapsed,
        a.reliable_ordered().metrics().retransmissions
    );

    let retransmissions = a.reliable_ordered().metrics().retransmissions;
    assert!(retransmissions <= 5 * (MAX_SEND_ATTEMPTS - 1));
    assert_eq!(a.reliable_ordered().metrics().messages_acked, 5);
}

#[test]
fn test_unreliable_ordered_never_goes_backwards() {
    let conditions = PacketLossSimulation {
        enabled: true,
        loss_percent: 10.0,
        min_latency_ms: 0,
        max_latency_ms: 0,
        jitter_ms: 200,
    };
    let network = SimulatedNetwork::new(conditions, 7);
    let mut socket_a = network.bind(addr(1));
    let mut socket_b = network.bind(addr(2));
    let config = NetworkConfig::default();
    let mut factory = MessageFactory::new(16);

    let mut a = RemotePeer::new(addr(2), 1, 3, 4, &config);
    let mut b = RemotePeer::new(addr(1), 2, 3, 4, &config);

    let mut received = Vec::new();
    for payload in 0..100u8 {
        let mut message = factory.lend_message(MessageType::Inputs);
        message.set_flags(MessageFlags::ORDERED);
        if let MessageBody::Inputs(inputs) = message.body_mut() {
            inputs.data.push(payload);
        }
        a.add_message(message, &mut factory).unwrap();
        a.send_data(&mut socket_a, &mut factory).unwrap();
        network.advance(0.016);
        pump(&mut socket_b, &mut b, &mut factory);
        drain_inputs(&mut b, &mut factory, &mut received);
    }
    network.advance(1.0);
    pump(&mut socket_b, &mut b, &mut factory);
    drain_inputs(&mut b, &mut factory, &mut received);

    assert!(!received.is_empty());
    assert!(received.windows(2).all(|w| w[0] < w[1]));
    assert!(received.len() < 100);
}
