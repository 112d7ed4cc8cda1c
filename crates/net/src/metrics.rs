/// Counters kept by every transmission channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelMetrics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_acked: u64,
    pub duplicated_messages: u64,
    pub out_of_order_messages: u64,
    pub stale_messages: u64,
    pub packets_lost: u64,
    pub retransmissions: u64,
    pub rtt_ms: f32,
}

/// Aggregate view over all channels of one remote peer.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub duplicated_messages: u64,
    pub out_of_order_messages: u64,
    pub retransmissions: u64,
    pub rtt_ms: f32,
    pub packet_loss_percent: f32,
}

impl NetworkStats {
    pub fn accumulate(&mut self, metrics: &ChannelMetrics) {
        self.packets_sent += metrics.packets_sent;
        self.packets_received += metrics.packets_received;
        self.packets_lost += metrics.packets_lost;
        self.bytes_sent += metrics.bytes_sent;
        self.duplicated_messages += metrics.duplicated_messages;
        self.out_of_order_messages += metrics.out_of_order_messages;
        self.retransmissions += metrics.retransmissions;
        if metrics.rtt_ms > 0.0 {
            self.rtt_ms = metrics.rtt_ms;
        }

        if self.packets_sent > 0 {
            self.packet_loss_percent =
                (self.packets_lost as f32 / self.packets_sent as f32) * 100.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_channels() {
        let reliable = ChannelMetrics {
            packets_sent: 8,
            packets_lost: 2,
            rtt_ms: 40.0,
            ..Default::default()
        };
        let unreliable = ChannelMetrics {
            packets_sent: 12,
            ..Default::default()
        };

        let mut stats = NetworkStats::default();
        stats.accumulate(&unreliable);
        stats.accumulate(&reliable);

        assert_eq!(stats.packets_sent, 20);
        assert_eq!(stats.rtt_ms, 40.0);
        assert!((stats.packet_loss_percent - 10.0).abs() < f32::EPSILON);
    }
}
