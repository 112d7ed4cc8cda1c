use std::collections::VecDeque;

use super::{ChannelType, TransmissionChannel, check_outgoing};
use crate::message::{Message, MessageFactory};
use crate::metrics::ChannelMetrics;

/// Fire-and-forget delivery. Messages are released as soon as their packet
/// leaves and everything received is handed straight to the application.
#[derive(Debug)]
pub struct UnreliableUnorderedTransmissionChannel {
    mtu: usize,
    next_sequence_number: u16,
    unsent: VecDeque<Box<Message>>,
    ready: VecDeque<Box<Message>>,
    metrics: ChannelMetrics,
}

impl UnreliableUnorderedTransmissionChannel {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            next_sequence_number: 0,
            unsent: VecDeque::new(),
            ready: VecDeque::new(),
            metrics: ChannelMetrics::default(),
        }
    }
}

impl TransmissionChannel for UnreliableUnorderedTransmissionChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::UnreliableUnordered
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
        !self.unsent.is_empty()
    }

    fn next_message_size(&self) -> Option<usize> {
        self.unsent.front().map(|m| m.size())
    }

    fn get_message_to_send(&mut self) -> Option<Box<Message>> {
        let mut message = self.unsent.pop_front()?;
        message.header_mut().sequence_number = self.next_sequence_number;
        self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
        Some(message)
    }

    fn on_packet_sent(&mut self, messages: Vec<Box<Message>>, factory: &mut MessageFactory) {
        factory.release_all(messages);
    }

    fn add_received_message(&mut self, message: Box<Message>, _factory: &mut MessageFactory) {
        self.metrics.messages_received += 1;
        self.ready.push_back(message);
    }

    fn are_pending_ready_to_process_messages(&self) -> bool {
        !self.ready.is_empty()
    }

    fn get_ready_to_process_message(&mut self) -> Option<Box<Message>> {
        self.ready.pop_front()
    }

    fn reset(&mut self, factory: &mut MessageFactory) {
        factory.release_all(self.unsent.drain(..));
        factory.release_all(self.ready.drain(..));
        self.next_sequence_number = 0;
        self.metrics = ChannelMetrics::default();
    }

    fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    fn metrics_mut(&mut self) -> &mut ChannelMetrics {
        &mut self.metrics
    }
}
