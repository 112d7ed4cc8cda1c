use std::collections::VecDeque;

use super::{ChannelType, TransmissionChannel, check_outgoing};
use crate::message::{Message, MessageFactory};
use crate::metrics::ChannelMetrics;
use crate::sequence::sequence_greater_than;

/// Delivers messages in sending order and drops anything older than the
/// newest message already accepted. Gaps are never filled.
#[derive(Debug)]
pub struct UnreliableOrderedTransmissionChannel {
    mtu: usize,
    next_sequence_number: u16,
    last_received_sequence_number: Option<u16>,
    unsent: VecDeque<Box<Message>>,
    ready: VecDeque<Box<Message>>,
    metrics: ChannelMetrics,
}

impl UnreliableOrderedTransmissionChannel {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            next_sequence_number: 0,
            last_received_sequence_number: None,
            unsent: VecDeque::new(),
            ready: VecDeque::new(),
            metrics: ChannelMetrics::default(),
        }
    }

    pub fn last_received_sequence_number(&self) -> Option<u16> {
        self.last_received_sequence_number
    }
}

impl TransmissionChannel for UnreliableOrderedTransmissionChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::UnreliableOrdered
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

    fn add_received_message(&mut self, message: Box<Message>, factory: &mut MessageFactory) {
        let sequence_number = message.sequence_number();
        let is_newer = self
            .last_received_sequence_number
            .is_none_or(|last| sequence_greater_than(sequence_number, last));

        if !is_newer {
            log::trace!(
                "Dropping stale {:?} message {} (last accepted {:?})",
                message.message_type(),
                sequence_number,
                self.last_received_sequence_number
            );
            self.metrics.stale_messages += 1;
            factory.release_message(message);
            return;
        }

        self.last_received_sequence_number = Some(sequence_number);
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
        self.last_received_sequence_number = None;
        self.metrics = ChannelMetrics::default();
    }

    fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    fn metrics_mut(&mut self) -> &mut ChannelMetrics {
        &mut self.metrics
    }
}
