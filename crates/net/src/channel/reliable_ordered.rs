use std::collections::{HashMap, VecDeque};

use super::{ChannelType, TransmissionChannel, check_outgoing};
use crate::message::{Message, MessageFactory};
use crate::metrics::ChannelMetrics;
use crate::sequence::{sequence_greater_than, sequence_less_than};

pub const DEFAULT_RELIABLE_INITIAL_TIMEOUT_SECONDS: f32 = 0.5;

/// Sequence numbers covered by one ACK header. Also bounds how far the newest
/// in-flight message may run ahead of the oldest unacknowledged one.
pub const RELIABLE_ACK_WINDOW_SIZE: usize = 32;

const RTT_SMOOTHING_FACTOR: f32 = 0.1;

#[derive(Debug, Clone, Copy, Default)]
struct ReceivedEntry {
    sequence_number: u16,
    is_acked: bool,
}

#[derive(Debug)]
struct UnackedMessage {
    message: Box<Message>,
    timeout: f32,
    timed_out: bool,
}

/// Exactly-once, in-order delivery with selective ACKs and timed
/// retransmission.
#[derive(Debug)]
pub struct ReliableOrderedTransmissionChannel {
    mtu: usize,
    initial_timeout: f32,
    current_time: f64,

    next_sequence_number: u16,
    unsent: VecDeque<Box<Message>>,
    unacked: Vec<UnackedMessage>,
    send_times: HashMap<u16, f64>,
    rtt_ms: f32,
    has_rtt_sample: bool,

    received: [ReceivedEntry; RELIABLE_ACK_WINDOW_SIZE],
    last_acked_message_sequence_number: u16,
    are_unsent_acks: bool,
    next_ordered_message_sequence_number: u16,
    out_of_order: Vec<Box<Message>>,
    ready: VecDeque<Box<Message>>,

    metrics: ChannelMetrics,
}

impl ReliableOrderedTransmissionChannel {
    pub fn new(mtu: usize, initial_timeout: f32) -> Self {
        Self {
            mtu,
            initial_timeout,
            current_time: 0.0,
            next_sequence_number: 0,
            unsent: VecDeque::new(),
            unacked: Vec::new(),
            send_times: HashMap::new(),
            rtt_ms: 0.0,
            has_rtt_sample: false,
            received: [ReceivedEntry::default(); RELIABLE_ACK_WINDOW_SIZE],
            // Nothing received yet: acking 65535 can never match an in-flight
            // message of a peer that only just started at 0.
            last_acked_message_sequence_number: u16::MAX,
            are_unsent_acks: false,
            next_ordered_message_sequence_number: 0,
            out_of_order: Vec::new(),
            ready: VecDeque::new(),
            metrics: ChannelMetrics::default(),
        }
    }

    /// True when `sequence_number` was received, ACKed and still sits in the
    /// receive window.
    pub fn is_message_duplicated(&self, sequence_number: u16) -> bool {
        let entry = &self.received[window_index(sequence_number)];
        entry.is_acked && entry.sequence_number == sequence_number
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    pub fn has_unsent_acks(&self) -> bool {
        self.are_unsent_acks
    }

    fn retransmission_timeout(&self) -> f32 {
        self.initial_timeout.max(self.rtt_ms / 1000.0 * 2.0)
    }

    /// New messages may only be numbered while every in-flight sequence
    /// number stays within one ACK window of the next one.
    fn send_window_open(&self) -> bool {
        let next = self.next_sequence_number;
        self.send_times
            .keys()
            .all(|&in_flight| usize::from(next.wrapping_sub(in_flight)) < RELIABLE_ACK_WINDOW_SIZE)
    }

    fn can_send_new(&self) -> bool {
        !self.unsent.is_empty() && self.send_window_open()
    }

    fn next_due_index(&self) -> Option<usize> {
        self.unacked.iter().position(|u| u.timeout <= 0.0)
    }

    fn ack_message(&mut self, sequence_number: u16, factory: &mut MessageFactory) {
        let Some(index) = self
            .unacked
            .iter()
            .position(|u| u.message.sequence_number() == sequence_number)
        else {
            return;
        };

        let unacked = self.unacked.remove(index);
        if let Some(sent_at) = self.send_times.remove(&sequence_number) {
            let sample_ms = ((self.current_time - sent_at) * 1000.0) as f32;
            self.add_rtt_sample(sample_ms);
        }
        self.metrics.messages_acked += 1;
        factory.release_message(unacked.message);
    }

    fn add_rtt_sample(&mut self, sample_ms: f32) {
        if self.has_rtt_sample {
            self.rtt_ms += RTT_SMOOTHING_FACTOR * (sample_ms - self.rtt_ms);
        } else {
            self.rtt_ms = sample_ms;
            self.has_rtt_sample = true;
        }
        self.metrics.rtt_ms = self.rtt_ms;
    }

    fn mark_received(&mut self, sequence_number: u16) {
        self.received[window_index(sequence_number)] = ReceivedEntry {
            sequence_number,
            is_acked: true,
        };
        if sequence_greater_than(sequence_number, self.last_acked_message_sequence_number) {
            self.last_acked_message_sequence_number = sequence_number;
        }
    }

    fn deliver_in_order(&mut self, message: Box<Message>) {
        self.ready.push_back(message);
        self.next_ordered_message_sequence_number =
            self.next_ordered_message_sequence_number.wrapping_add(1);

        while let Some(index) = self
            .out_of_order
            .iter()
            .position(|m| m.sequence_number() == self.next_ordered_message_sequence_number)
        {
            let next = self.out_of_order.swap_remove(index);
            self.ready.push_back(next);
            self.next_ordered_message_sequence_number =
                self.next_ordered_message_sequence_number.wrapping_add(1);
        }
    }
}

fn window_index(sequence_number: u16) -> usize {
    usize::from(sequence_number) % RELIABLE_ACK_WINDOW_SIZE
}

impl TransmissionChannel for ReliableOrderedTransmissionChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::ReliableOrdered
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn add_message_to_send(&mut self, message: Box<Message>) -> Result<(), Box<Message>> {
        if !check_outgoing(self, &message) {
            return Err(message);
        }
        self.unsent.push_back(message);
        Ok(())
    }

    fn are_pending_messages_to_send(&self) -> bool {
        self.are_unsent_acks || self.next_message_size().is_some()
    }

    fn next_message_size(&self) -> Option<usize> {
        if self.can_send_new() {
            return self.unsent.front().map(|m| m.size());
        }
        self.next_due_index()
            .map(|index| self.unacked[index].message.size())
    }

    fn get_message_to_send(&mut self) -> Option<Box<Message>> {
        if self.can_send_new() {
            let mut message = self.unsent.pop_front()?;
            let sequence_number = self.next_sequence_number;
            message.header_mut().sequence_number = sequence_number;
            self.next_sequence_number = sequence_number.wrapping_add(1);
            self.send_times.insert(sequence_number, self.current_time);
            return Some(message);
        }

        let index = self.next_due_index()?;
        let unacked = self.unacked.remove(index);
        let sequence_number = unacked.message.sequence_number();
        log::debug!(
            "Resending {:?} message {}",
            unacked.message.message_type(),
            sequence_number
        );
        self.send_times.insert(sequence_number, self.current_time);
        self.metrics.retransmissions += 1;
        Some(unacked.message)
    }

    fn on_packet_sent(&mut self, messages: Vec<Box<Message>>, _factory: &mut MessageFactory) {
        let timeout = self.retransmission_timeout();
        self.unacked
            .extend(messages.into_iter().map(|message| UnackedMessage {
                message,
                timeout,
                timed_out: false,
            }));
        self.are_unsent_acks = false;
    }

    fn add_received_message(&mut self, message: Box<Message>, factory: &mut MessageFactory) {
        let sequence_number = message.sequence_number();
        self.are_unsent_acks = true;

        let already_delivered =
            sequence_less_than(sequence_number, self.next_ordered_message_sequence_number);
        let already_parked = self
            .out_of_order
            .iter()
            .any(|m| m.sequence_number() == sequence_number);

        if self.is_message_duplicated(sequence_number) || already_delivered || already_parked {
            log::trace!("Duplicated reliable message {}", sequence_number);
            self.metrics.duplicated_messages += 1;
            factory.release_message(message);
            return;
        }

        self.mark_received(sequence_number);
        self.metrics.messages_received += 1;

        if sequence_number == self.next_ordered_message_sequence_number {
            self.deliver_in_order(message);
        } else {
            self.metrics.out_of_order_messages += 1;
            self.out_of_order.push(message);
        }
    }

    fn are_pending_ready_to_process_messages(&self) -> bool {
        !self.ready.is_empty()
    }

    fn get_ready_to_process_message(&mut self) -> Option<Box<Message>> {
        self.ready.pop_front()
    }

    fn ack_state(&self) -> (u16, u32) {
        let last_acked = self.last_acked_message_sequence_number;
        let mut ack_bits = 0u32;
        for bit in 0..RELIABLE_ACK_WINDOW_SIZE as u16 {
            let sequence_number = last_acked.wrapping_sub(1).wrapping_sub(bit);
            if self.is_message_duplicated(sequence_number) {
                ack_bits |= 1 << bit;
            }
        }
        (last_acked, ack_bits)
    }

    fn process_acks(&mut self, ack_bits: u32, last_acked: u16, factory: &mut MessageFactory) {
        self.ack_message(last_acked, factory);
        for bit in 0..RELIABLE_ACK_WINDOW_SIZE as u16 {
            if ack_bits & (1 << bit) != 0 {
                self.ack_message(last_acked.wrapping_sub(1).wrapping_sub(bit), factory);
            }
        }
    }

    fn update(&mut self, dt: f32) {
        self.current_time += f64::from(dt);
        for unacked in &mut self.unacked {
            if unacked.timeout > 0.0 {
                unacked.timeout = (unacked.timeout - dt).max(0.0);
            }
            if unacked.timeout <= 0.0 && !unacked.timed_out {
                unacked.timed_out = true;
                self.metrics.packets_lost += 1;
            }
        }
    }

    fn reset(&mut self, factory: &mut MessageFactory) {
        factory.release_all(self.unsent.drain(..));
        factory.release_all(self.unacked.drain(..).map(|u| u.message));
        factory.release_all(self.out_of_order.drain(..));
        factory.release_all(self.ready.drain(..));
        *self = Self::new(self.mtu, self.initial_timeout);
    }

    fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    fn metrics_mut(&mut self) -> &mut ChannelMetrics {
        &mut self.metrics
    }

    fn rtt_ms(&self) -> f32 {
        self.rtt_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, MessageFlags, MessageType};
    use crate::packet::DEFAULT_MTU;
    use proptest::prelude::*;

    fn channel() -> ReliableOrderedTransmissionChannel {
        ReliableOrderedTransmissionChannel::new(DEFAULT_MTU, DEFAULT_RELIABLE_INITIAL_TIMEOUT_SECONDS)
    }

    fn reliable(factory: &mut MessageFactory, payload: u8) -> Box<Message> {
        let mut message = factory.lend_message(MessageType::Inputs);
        message.set_flags(MessageFlags::RELIABLE | MessageFlags::ORDERED);
        if let MessageBody::Inputs(inputs) = message.body_mut() {
            inputs.data.push(payload);
        }
        message
    }

    fn received(factory: &mut MessageFactory, sequence_number: u16) -> Box<Message> {
        let mut message = reliable(factory, sequence_number as u8);
        message.header_mut().sequence_number = sequence_number;
        message
    }

    fn drain(
        channel: &mut ReliableOrderedTransmissionChannel,
        factory: &mut MessageFactory,
    ) -> Vec<u16> {
        let mut sequence_numbers = Vec::new();
        while let Some(message) = channel.get_ready_to_process_message() {
            sequence_numbers.push(message.sequence_number());
            factory.release_message(message);
        }
        sequence_numbers
    }

    /// Takes everything the channel wants to send right now, as one packet.
    fn send_all(
        channel: &mut ReliableOrderedTransmissionChannel,
        factory: &mut MessageFactory,
    ) -> Vec<u16> {
        let mut messages = Vec::new();
        while let Some(message) = channel.get_message_to_send() {
            messages.push(message);
        }
        let sequence_numbers = messages.iter().map(|m| m.sequence_number()).collect();
        channel.on_packet_sent(messages, factory);
        sequence_numbers
    }

    #[test]
    fn test_rejects_unreliable_messages() {
        let mut factory = MessageFactory::new(2);
        let mut channel = channel();
        let mut message = factory.lend_message(MessageType::Inputs);
        message.set_flags(MessageFlags::ORDERED);
        let rejected = channel.add_message_to_send(message).unwrap_err();
        factory.release_message(rejected);
        assert!(!channel.are_pending_messages_to_send());
    }

    #[test]
    fn test_in_order_delivery_with_reordering() {
        let mut factory = MessageFactory::new(8);
        let mut channel = channel();

        for sequence in [2, 0, 3, 1] {
            let message = received(&mut factory, sequence);
            channel.add_received_message(message, &mut factory);
        }

        assert_eq!(drain(&mut channel, &mut factory), vec![0, 1, 2, 3]);
        assert_eq!(channel.metrics().out_of_order_messages, 2);
    }

    #[test]
    fn test_duplicate_is_reacked_and_dropped() {
        let mut factory = MessageFactory::new(8);
        let mut channel = channel();

        let message = received(&mut factory, 0);
        channel.add_received_message(message, &mut factory);
        assert_eq!(drain(&mut channel, &mut factory), vec![0]);

        channel.on_packet_sent(Vec::new(), &mut factory);
        assert!(!channel.has_unsent_acks());

        let message = received(&mut factory, 0);
        channel.add_received_message(message, &mut factory);
        assert!(channel.has_unsent_acks());
        assert!(drain(&mut channel, &mut factory).is_empty());
        assert_eq!(channel.metrics().duplicated_messages, 1);
        assert_eq!(channel.ack_state().0, 0);
        assert_eq!(factory.total_outstanding(), 0);
    }

    #[test]
    fn test_ack_bits_cover_previous_messages() {
        let mut factory = MessageFactory::new(8);
        let mut channel = channel();
        for sequence in [0, 1, 3] {
            let message = received(&mut factory, sequence);
            channel.add_received_message(message, &mut factory);
        }

        let (last_acked, ack_bits) = channel.ack_state();
        assert_eq!(last_acked, 3);
        // 2 missing, 1 and 0 present
        assert_eq!(ack_bits & 0b111, 0b110);
    }

    #[test]
    fn test_acks_release_and_measure_rtt() {
        let mut factory = MessageFactory::new(8);
        let mut channel = channel();
        for payload in 0..3 {
            channel
                .add_message_to_send(reliable(&mut factory, payload))
                .unwrap();
        }
        assert_eq!(send_all(&mut channel, &mut factory), vec![0, 1, 2]);
        assert_eq!(channel.unacked_count(), 3);

        channel.update(0.1);
        channel.process_acks(0b1, 2, &mut factory);

        assert_eq!(channel.unacked_count(), 1);
        assert_eq!(factory.outstanding(MessageType::Inputs), 1);
        assert!((channel.rtt_ms() - 100.0).abs() < 0.5);
        assert_eq!(channel.metrics().messages_acked, 2);
    }

    #[test]
    fn test_rtt_moving_average() {
        let mut channel = channel();
        channel.add_rtt_sample(100.0);
        assert_eq!(channel.rtt_ms(), 100.0);
        channel.add_rtt_sample(200.0);
        assert!((channel.rtt_ms() - 110.0).abs() < 0.001);
    }

    #[test]
    fn test_retransmits_after_timeout() {
        let mut factory = MessageFactory::new(4);
        let mut channel = channel();
        channel
            .add_message_to_send(reliable(&mut factory, 9))
            .unwrap();
        assert_eq!(send_all(&mut channel, &mut factory), vec![0]);
        assert!(!channel.are_pending_messages_to_send());

        channel.update(0.3);
        assert!(!channel.are_pending_messages_to_send());

        channel.update(0.3);
        assert!(channel.are_pending_messages_to_send());
        assert_eq!(channel.metrics().packets_lost, 1);

        assert_eq!(send_all(&mut channel, &mut factory), vec![0]);
        assert_eq!(channel.metrics().retransmissions, 1);

        // Re-armed with the full timeout
        channel.update(0.3);
        assert!(!channel.are_pending_messages_to_send());
    }

    #[test]
    fn test_new_messages_go_before_resends() {
        let mut factory = MessageFactory::new(4);
        let mut channel = channel();
        channel
            .add_message_to_send(reliable(&mut factory, 0))
            .unwrap();
        send_all(&mut channel, &mut factory);
        channel.update(1.0);

        channel
            .add_message_to_send(reliable(&mut factory, 1))
            .unwrap();
        let first = channel.get_message_to_send().unwrap();
        assert_eq!(first.sequence_number(), 1);
        let second = channel.get_message_to_send().unwrap();
        assert_eq!(second.sequence_number(), 0);
        channel.on_packet_sent(vec![first, second], &mut factory);
    }

    #[test]
    fn test_send_window_limits_in_flight() {
        let mut factory = MessageFactory::new(64);
        let mut channel = channel();
        for payload in 0..40 {
            channel
                .add_message_to_send(reliable(&mut factory, payload))
                .unwrap();
        }

        let sent = send_all(&mut channel, &mut factory);
        assert_eq!(sent.len(), RELIABLE_ACK_WINDOW_SIZE);

        channel.process_acks(0, 0, &mut factory);
        assert_eq!(send_all(&mut channel, &mut factory), vec![32]);
    }

    #[test]
    fn test_duplicate_window_wraps() {
        let mut factory = MessageFactory::new(4);
        let mut channel = channel();
        channel.next_ordered_message_sequence_number = 65535;
        channel.last_acked_message_sequence_number = 65534;

        for sequence in [65535, 0] {
            let message = received(&mut factory, sequence);
            channel.add_received_message(message, &mut factory);
        }

        assert!(channel.is_message_duplicated(65535));
        assert!(channel.is_message_duplicated(0));
        assert!(!channel.is_message_duplicated(1));
        assert_eq!(channel.ack_state(), (0, 0b1));
        assert_eq!(drain(&mut channel, &mut factory), vec![65535, 0]);
    }

    #[test]
    fn test_reset_releases_everything() {
        let mut factory = MessageFactory::new(8);
        let mut channel = channel();
        channel
            .add_message_to_send(reliable(&mut factory, 0))
            .unwrap();
        send_all(&mut channel, &mut factory);
        channel
            .add_message_to_send(reliable(&mut factory, 1))
            .unwrap();
        let parked = received(&mut factory, 5);
        channel.add_received_message(parked, &mut factory);
        let ready = received(&mut factory, 0);
        channel.add_received_message(ready, &mut factory);

        channel.reset(&mut factory);
        assert_eq!(factory.total_outstanding(), 0);
        assert!(!channel.are_pending_messages_to_send());
        assert_eq!(channel.ack_state().0, u16::MAX);
    }

    proptest! {
        #[test]
        fn prop_delivers_each_message_once_in_order(
            order in Just((0u16..24).collect::<Vec<_>>()).prop_shuffle(),
            duplicates in proptest::collection::vec(0u16..24, 0..16),
        ) {
            let mut factory = MessageFactory::new(64);
            let mut channel = channel();

            for sequence in order.iter().chain(duplicates.iter()) {
                let message = received(&mut factory, *sequence);
                channel.add_received_message(message, &mut factory);
            }

            let delivered = drain(&mut channel, &mut factory);
            prop_assert_eq!(delivered, (0u16..24).collect::<Vec<_>>());
            prop_assert_eq!(factory.total_outstanding(), 0);
        }

        #[test]
        fn prop_acked_sequence_is_duplicate(start in any::<u16>(), count in 1u16..32) {
            let mut factory = MessageFactory::new(64);
            let mut channel = channel();
            channel.next_ordered_message_sequence_number = start;

            for offset in 0..count {
                let message = received(&mut factory, start.wrapping_add(offset));
                channel.add_received_message(message, &mut factory);
            }

            for offset in 0..count {
                prop_assert!(channel.is_message_duplicated(start.wrapping_add(offset)));
            }
            prop_assert!(!channel.is_message_duplicated(start.wrapping_add(count)));
            drain(&mut channel, &mut factory);
        }
    }
}
