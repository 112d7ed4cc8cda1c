use super::{Message, MessageType};

pub const DEFAULT_INITIAL_POOL_SIZE: usize = 32;

/// Per-type message pools.
///
/// `lend_message` hands out a boxed message that the caller owns outright;
/// `release_message` consumes the box, so a message can only travel back to
/// the pool once. When a pool runs dry a fresh instance is allocated and a
/// warning is logged.
#[derive(Debug)]
pub struct MessageFactory {
    pools: Vec<Vec<Box<Message>>>,
    outstanding: [usize; MessageType::COUNT],
    allocations: usize,
}

impl MessageFactory {
    pub fn new(initial_pool_size: usize) -> Self {
        let pools = MessageType::ALL
            .iter()
            .map(|&message_type| {
                (0..initial_pool_size)
                    .map(|_| Box::new(Message::new(message_type)))
                    .collect()
            })
            .collect();

        Self {
            pools,
            outstanding: [0; MessageType::COUNT],
            allocations: 0,
        }
    }

    pub fn lend_message(&mut self, message_type: MessageType) -> Box<Message> {
        self.outstanding[message_type.index()] += 1;
        match self.pools[message_type.index()].pop() {
            Some(message) => message,
            None => {
                self.allocations += 1;
                log::warn!(
                    "Message pool for {:?} exhausted, allocating a new instance",
                    message_type
                );
                Box::new(Message::new(message_type))
            }
        }
    }

    /// Lends a message of the same type as `source` holding a copy of it.
    pub fn lend_copy(&mut self, source: &Message) -> Box<Message> {
        let mut message = self.lend_message(source.message_type());
        message.copy_from(source);
        message
    }

    pub fn release_message(&mut self, mut message: Box<Message>) {
        let index = message.message_type().index();
        self.outstanding[index] = self.outstanding[index].saturating_sub(1);
        message.reset();
        self.pools[index].push(message);
    }

    pub fn release_all(&mut self, messages: impl IntoIterator<Item = Box<Message>>) {
        for message in messages {
            self.release_message(message);
        }
    }

    pub fn available(&self, message_type: MessageType) -> usize {
        self.pools[message_type.index()].len()
    }

    /// Messages of `message_type` currently lent and not yet released.
    pub fn outstanding(&self, message_type: MessageType) -> usize {
        self.outstanding[message_type.index()]
    }

    pub fn total_outstanding(&self) -> usize {
        self.outstanding.iter().sum()
    }

    /// Instances allocated because a pool was empty.
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, MessageFlags};

    #[test]
    fn test_lend_and_release() {
        let mut factory = MessageFactory::new(2);
        assert_eq!(factory.available(MessageType::PingPong), 2);

        let message = factory.lend_message(MessageType::PingPong);
        assert_eq!(message.message_type(), MessageType::PingPong);
        assert_eq!(factory.available(MessageType::PingPong), 1);
        assert_eq!(factory.outstanding(MessageType::PingPong), 1);

        factory.release_message(message);
        assert_eq!(factory.available(MessageType::PingPong), 2);
        assert_eq!(factory.total_outstanding(), 0);
    }

    #[test]
    fn test_exhausted_pool_allocates() {
        let mut factory = MessageFactory::new(1);
        let first = factory.lend_message(MessageType::Inputs);
        let second = factory.lend_message(MessageType::Inputs);
        assert_eq!(factory.allocations(), 1);

        factory.release_all([first, second]);
        assert_eq!(factory.available(MessageType::Inputs), 2);
    }

    #[test]
    fn test_released_message_is_reset() {
        let mut factory = MessageFactory::new(1);
        let mut message = factory.lend_message(MessageType::TimeRequest);
        message.header_mut().sequence_number = 40;
        message.set_flags(MessageFlags::ORDERED);
        if let MessageBody::TimeRequest(request) = message.body_mut() {
            request.remote_time = 1234;
        }
        factory.release_message(message);

        let message = factory.lend_message(MessageType::TimeRequest);
        assert_eq!(message.sequence_number(), 0);
        assert!(message.header().flags.is_empty());
        assert_eq!(message.body(), &MessageBody::TimeRequest(Default::default()));
    }

    #[test]
    fn test_lend_copy_leaves_source_untouched() {
        let mut factory = MessageFactory::new(2);
        let mut source = factory.lend_message(MessageType::Inputs);
        if let MessageBody::Inputs(inputs) = source.body_mut() {
            inputs.data = vec![1, 2, 3];
        }

        let copy = factory.lend_copy(&source);
        assert_eq!(*copy, *source);
        factory.release_message(copy);

        match source.body() {
            MessageBody::Inputs(inputs) => assert_eq!(inputs.data, vec![1, 2, 3]),
            other => panic!("unexpected body {:?}", other),
        }
    }
}
