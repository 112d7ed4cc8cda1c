use std::collections::VecDeque;

use super::TimeClock;
use crate::message::{MessageBody, MessageFactory, MessageType, TimeResponseMessage};
use crate::peer::RemotePeer;

pub const TIME_SYNC_WINDOW_SIZE: usize = 10;

/// Estimates the server clock offset from TimeRequest / TimeResponse round
/// trips.
///
/// A burst of requests fills the sample window quickly after connecting;
/// afterwards one request goes out per interval. Once the window is full the
/// fastest and slowest samples are discarded and the rest averaged.
#[derive(Debug)]
pub struct TimeSyncer {
    samples: VecDeque<u32>,
    frequency_seconds: f32,
    burst_size: usize,
    timer: f32,
    burst_sent: bool,
}

impl TimeSyncer {
    pub fn new(frequency_seconds: f32, burst_size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(TIME_SYNC_WINDOW_SIZE),
            frequency_seconds,
            burst_size,
            timer: 0.0,
            burst_sent: false,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.samples.len() == TIME_SYNC_WINDOW_SIZE
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Queues the initial burst, then one request per interval, on the
    /// server peer's unreliable unordered channel.
    pub fn update(
        &mut self,
        dt: f32,
        clock: &TimeClock,
        server: &mut RemotePeer,
        factory: &mut MessageFactory,
    ) {
        let requests = if self.burst_sent {
            self.timer += dt;
            if self.timer < self.frequency_seconds {
                return;
            }
            self.timer = 0.0;
            1
        } else {
            self.burst_sent = true;
            self.burst_size
        };

        let remote_time = clock.local_time_ms();
        for _ in 0..requests {
            let mut request = factory.lend_message(MessageType::TimeRequest);
            if let MessageBody::TimeRequest(time_request) = request.body_mut() {
                time_request.remote_time = remote_time;
            }
            if let Err(e) = server.add_message(request, factory) {
                log::warn!("Time request not queued: {}", e);
            }
        }
    }

    pub fn process_time_response(&mut self, response: &TimeResponseMessage, clock: &mut TimeClock) {
        let rtt_ms = clock.local_time_ms().wrapping_sub(response.remote_time);
        if self.samples.len() == TIME_SYNC_WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);

        if let Some(mean_rtt_ms) = self.filtered_mean_rtt_ms() {
            let offset_ms = response.server_time.wrapping_sub(response.remote_time) as i32;
            let delta = (f64::from(offset_ms) - mean_rtt_ms / 2.0) / 1000.0;
            clock.set_server_clock_delta(delta);
            log::trace!("Server clock delta {:.3}s (rtt {:.1}ms)", delta, mean_rtt_ms);
        }
    }

    /// Mean RTT with the single fastest and slowest samples dropped. `None`
    /// until the window is full.
    pub fn filtered_mean_rtt_ms(&self) -> Option<f64> {
        if !self.is_synchronized() {
            return None;
        }
        let mut sorted: Vec<u32> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let kept = &sorted[1..sorted.len() - 1];
        let sum: f64 = kept.iter().map(|&s| f64::from(s)).sum();
        Some(sum / kept.len() as f64)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.timer = 0.0;
        self.burst_sent = false;
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::channel::ChannelType;
    use crate::config::NetworkConfig;

    fn server_peer() -> RemotePeer {
        RemotePeer::new(
            SocketAddr::from(([127, 0, 0, 1], 9)),
            0,
            1,
            2,
            &NetworkConfig::default(),
        )
    }

    fn queued_requests(peer: &mut RemotePeer, factory: &mut MessageFactory) -> usize {
        let channel = peer.channel_mut(ChannelType::UnreliableUnordered);
        let mut count = 0;
        while let Some(message) = channel.get_message_to_send() {
            if message.message_type() == MessageType::TimeRequest {
                count += 1;
            }
            factory.release_message(message);
        }
        count
    }

    #[test]
    fn test_burst_then_periodic() {
        let mut factory = MessageFactory::new(16);
        let clock = TimeClock::new();
        let mut peer = server_peer();
        let mut syncer = TimeSyncer::new(1.0, 11);

        syncer.update(0.1, &clock, &mut peer, &mut factory);
        assert_eq!(queued_requests(&mut peer, &mut factory), 11);

        syncer.update(0.5, &clock, &mut peer, &mut factory);
        assert_eq!(queued_requests(&mut peer, &mut factory), 0);

        syncer.update(0.5, &clock, &mut peer, &mut factory);
        assert_eq!(queued_requests(&mut peer, &mut factory), 1);
    }

    #[test]
    fn test_delta_discards_outliers() {
        let mut clock = TimeClock::new();
        clock.update(10.0);
        let mut syncer = TimeSyncer::new(1.0, 11);

        // rtt samples 100ms, except one 10ms and one 900ms outlier
        let rtts = [100, 100, 10, 100, 100, 900, 100, 100, 100, 100];
        for (i, rtt) in rtts.iter().enumerate() {
            let response = TimeResponseMessage {
                remote_time: 10_000 - rtt,
                server_time: 60_000 - rtt + 50,
            };
            syncer.process_time_response(&response, &mut clock);
            assert_eq!(syncer.is_synchronized(), i == rtts.len() - 1);
        }

        assert_eq!(syncer.filtered_mean_rtt_ms(), Some(100.0));
        // server clock runs 50s ahead of the local one
        assert!((clock.server_clock_delta_seconds() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut clock = TimeClock::new();
        clock.update(1.0);
        let mut syncer = TimeSyncer::new(1.0, 11);
        for _ in 0..15 {
            let response = TimeResponseMessage {
                remote_time: 900,
                server_time: 900,
            };
            syncer.process_time_response(&response, &mut clock);
        }
        assert_eq!(syncer.sample_count(), TIME_SYNC_WINDOW_SIZE);
    }
}
