use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::socket::DatagramSocket;

/// Artificial network conditions applied to outgoing datagrams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// Percentage of datagrams dropped, 0 to 100.
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self, rng: &mut fastrand::Rng) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rng.f32() * 100.0 < self.loss_percent
    }

    pub fn delay_ms(&self, rng: &mut fastrand::Rng) -> u32 {
        if !self.enabled {
            return 0;
        }
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let spread = if range > 0 { rng.u32(0..=range) } else { 0 };
        let jitter = if self.jitter_ms > 0 {
            rng.u32(0..=self.jitter_ms)
        } else {
            0
        };
        self.min_latency_ms + spread + jitter
    }
}

#[derive(Debug)]
struct DelayedDatagram<T> {
    release_at: T,
    order: u64,
    data: Vec<u8>,
    from: SocketAddr,
    to: SocketAddr,
}

impl<T: PartialOrd> PartialEq for DelayedDatagram<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: PartialOrd> Eq for DelayedDatagram<T> {}

impl<T: PartialOrd> PartialOrd for DelayedDatagram<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: PartialOrd> Ord for DelayedDatagram<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_at
            .partial_cmp(&self.release_at)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[derive(Debug)]
struct NetworkState {
    now: f64,
    rng: fastrand::Rng,
    conditions: PacketLossSimulation,
    in_flight: BinaryHeap<DelayedDatagram<f64>>,
    inboxes: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
    next_order: u64,
    dropped: u64,
}

impl NetworkState {
    fn deliver_due(&mut self) {
        while self
            .in_flight
            .peek()
            .is_some_and(|datagram| datagram.release_at <= self.now)
        {
            if let Some(datagram) = self.in_flight.pop() {
                if let Some(inbox) = self.inboxes.get_mut(&datagram.to) {
                    inbox.push_back((datagram.data, datagram.from));
                }
            }
        }
    }
}

/// In-memory datagram network driven by simulated time.
///
/// Every socket bound on the same network shares one random source seeded at
/// construction, so a given seed always yields the same losses and delays.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl SimulatedNetwork {
    pub fn new(conditions: PacketLossSimulation, seed: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                now: 0.0,
                rng: fastrand::Rng::with_seed(seed),
                conditions,
                in_flight: BinaryHeap::new(),
                inboxes: HashMap::new(),
                next_order: 0,
                dropped: 0,
            })),
        }
    }

    pub fn perfect() -> Self {
        Self::new(PacketLossSimulation::default(), 0)
    }

    pub fn bind(&self, address: SocketAddr) -> SimulatedSocket {
        self.state
            .borrow_mut()
            .inboxes
            .entry(address)
            .or_default();
        SimulatedSocket {
            network: self.clone(),
            address,
        }
    }

    pub fn set_conditions(&self, conditions: PacketLossSimulation) {
        self.state.borrow_mut().conditions = conditions;
    }

    /// Moves simulated time forward and delivers every datagram that is due.
    pub fn advance(&self, dt: f32) {
        let mut state = self.state.borrow_mut();
        state.now += f64::from(dt);
        state.deliver_due();
    }

    pub fn dropped(&self) -> u64 {
        self.state.borrow().dropped
    }

    pub fn in_flight(&self) -> usize {
        self.state.borrow().in_flight.len()
    }
}

#[derive(Debug)]
pub struct SimulatedSocket {
    network: SimulatedNetwork,
    address: SocketAddr,
}

impl DatagramSocket for SimulatedSocket {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<usize> {
        let mut guard = self.network.state.borrow_mut();
        let state = &mut *guard;

        if state.conditions.should_drop(&mut state.rng) {
            state.dropped += 1;
            return Ok(data.len());
        }

        let delay_ms = state.conditions.delay_ms(&mut state.rng);
        let order = state.next_order;
        state.next_order += 1;
        state.in_flight.push(DelayedDatagram {
            release_at: state.now + f64::from(delay_ms) / 1000.0,
            order,
            data: data.to_vec(),
            from: self.address,
            to: address,
        });
        state.deliver_due();

        Ok(data.len())
    }

    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut state = self.network.state.borrow_mut();
        let Some(inbox) = state.inboxes.get_mut(&self.address) else {
            return Ok(None);
        };
        match inbox.pop_front() {
            Some((data, from)) => {
                let size = data.len().min(buffer.len());
                buffer[..size].copy_from_slice(&data[..size]);
                Ok(Some((size, from)))
            }
            None => Ok(None),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.address
    }
}

/// Wraps a real socket and applies [`PacketLossSimulation`] to outgoing
/// datagrams using wall-clock delays.
#[derive(Debug)]
pub struct ConditionedSocket<S> {
    inner: S,
    conditions: PacketLossSimulation,
    rng: fastrand::Rng,
    outbound: BinaryHeap<DelayedDatagram<Instant>>,
    next_order: u64,
}

impl<S: DatagramSocket> ConditionedSocket<S> {
    pub fn new(inner: S, conditions: PacketLossSimulation) -> Self {
        Self {
            inner,
            conditions,
            rng: fastrand::Rng::new(),
            outbound: BinaryHeap::new(),
            next_order: 0,
        }
    }

    pub fn set_conditions(&mut self, conditions: PacketLossSimulation) {
        self.conditions = conditions;
    }

    fn flush_due(&mut self) -> io::Result<()> {
        let now = Instant::now();
        while self
            .outbound
            .peek()
            .is_some_and(|datagram| datagram.release_at <= now)
        {
            if let Some(datagram) = self.outbound.pop() {
                self.inner.send_to(&datagram.data, datagram.to)?;
            }
        }
        Ok(())
    }
}

impl<S: DatagramSocket> DatagramSocket for ConditionedSocket<S> {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<usize> {
        self.flush_due()?;
        if self.conditions.should_drop(&mut self.rng) {
            return Ok(data.len());
        }

        let delay = Duration::from_millis(u64::from(self.conditions.delay_ms(&mut self.rng)));
        if delay.is_zero() {
            return self.inner.send_to(data, address);
        }

        let order = self.next_order;
        self.next_order += 1;
        self.outbound.push(DelayedDatagram {
            release_at: Instant::now() + delay,
            order,
            data: data.to_vec(),
            from: self.inner.local_addr(),
            to: address,
        });
        Ok(data.len())
    }

    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.flush_due()?;
        self.inner.recv_from(buffer)
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_perfect_network_delivers_in_order() {
        let network = SimulatedNetwork::perfect();
        let mut a = network.bind(addr(1));
        let mut b = network.bind(addr(2));

        a.send_to(&[1], addr(2)).unwrap();
        a.send_to(&[2], addr(2)).unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(b.recv_from(&mut buffer).unwrap(), Some((1, addr(1))));
        assert_eq!(buffer[0], 1);
        assert_eq!(b.recv_from(&mut buffer).unwrap(), Some((1, addr(1))));
        assert_eq!(buffer[0], 2);
        assert_eq!(b.recv_from(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_latency_holds_datagrams() {
        let network = SimulatedNetwork::new(
            PacketLossSimulation {
                enabled: true,
                min_latency_ms: 100,
                max_latency_ms: 100,
                ..Default::default()
            },
            7,
        );
        let mut a = network.bind(addr(1));
        let mut b = network.bind(addr(2));
        let mut buffer = [0u8; 8];

        a.send_to(&[5], addr(2)).unwrap();
        network.advance(0.05);
        assert_eq!(b.recv_from(&mut buffer).unwrap(), None);

        network.advance(0.06);
        assert_eq!(b.recv_from(&mut buffer).unwrap(), Some((1, addr(1))));
    }

    #[test]
    fn test_total_loss() {
        let network = SimulatedNetwork::new(
            PacketLossSimulation {
                enabled: true,
                loss_percent: 100.0,
                ..Default::default()
            },
            1,
        );
        let mut a = network.bind(addr(1));
        let mut b = network.bind(addr(2));

        for _ in 0..10 {
            a.send_to(&[0], addr(2)).unwrap();
        }

        let mut buffer = [0u8; 8];
        assert_eq!(b.recv_from(&mut buffer).unwrap(), None);
        assert_eq!(network.dropped(), 10);
    }

    #[test]
    fn test_disabled_simulation_is_transparent() {
        let sim = PacketLossSimulation {
            enabled: false,
            loss_percent: 100.0,
            max_latency_ms: 500,
            ..Default::default()
        };
        let mut rng = fastrand::Rng::with_seed(3);
        assert!(!sim.should_drop(&mut rng));
        assert_eq!(sim.delay_ms(&mut rng), 0);
    }
}
