use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec3;

use strand::{ConditionedSocket, DatagramSocket, Server, ServerEvent, UdpDatagramSocket};
use strand_demo::{AVATAR_ENTITY_TYPE, AvatarInput, DemoWorld};

use crate::config::ServerConfig;

pub struct GameServer {
    server: Server<Box<dyn DatagramSocket>>,
    world: DemoWorld,
    config: ServerConfig,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    start_time: Instant,
    stats_timer: f32,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let udp = UdpDatagramSocket::bind(bind_addr)?;
        let socket: Box<dyn DatagramSocket> = match &config.global_packet_loss {
            Some(conditions) => {
                log::info!(
                    "Simulating {}% loss, {}-{}ms latency, {}ms jitter",
                    conditions.loss_percent,
                    conditions.min_latency_ms,
                    conditions.max_latency_ms,
                    conditions.jitter_ms
                );
                Box::new(ConditionedSocket::new(udp, conditions.clone()))
            }
            None => Box::new(udp),
        };
        let tick_duration = Duration::from_secs_f64(1.0 / f64::from(config.tick_rate));

        Ok(Self {
            server: Server::new(socket, config.network.clone()),
            world: DemoWorld::new(),
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            start_time: Instant::now(),
            stats_timer: 0.0,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn run(&mut self) {
        loop {
            if self
                .config
                .run_for
                .is_some_and(|limit| self.start_time.elapsed() >= limit)
            {
                break;
            }
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.server.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick();
        }
    }

    fn tick(&mut self) {
        let dt = self.tick_duration.as_secs_f32();

        if let Err(e) = self.server.tick(dt) {
            log::error!("Network error: {}", e);
        }

        let events: Vec<ServerEvent> = self.server.drain_events().collect();
        for event in events {
            self.handle_event(event, dt);
        }

        self.stats_timer += dt;
        if self.stats_timer >= self.config.stats_interval_seconds {
            self.stats_timer = 0.0;
            self.log_stats();
        }
    }

    fn handle_event(&mut self, event: ServerEvent, dt: f32) {
        match event {
            ServerEvent::PeerConnected { peer_id, address } => {
                let spawn = Vec3::new(f32::from(peer_id) * 2.0, 0.0, 0.0);
                match self.server.create_network_entity(
                    &mut self.world,
                    AVATAR_ENTITY_TYPE,
                    u32::from(peer_id),
                    spawn,
                ) {
                    Ok(id) => log::info!(
                        "Peer {} connected from {} (entity {})",
                        peer_id,
                        address,
                        id
                    ),
                    Err(e) => log::error!("Could not spawn avatar for peer {}: {}", peer_id, e),
                }
            }
            ServerEvent::PeerDisconnected {
                peer_id,
                address,
                reason,
            } => {
                log::info!("Peer {} ({}) {}", peer_id, address, reason.as_str());
                self.server
                    .remove_entities_controlled_by(&mut self.world, peer_id);
            }
            ServerEvent::ConnectionDenied { address, reason } => {
                log::warn!("Connection denied to {}: {}", address, reason);
            }
            ServerEvent::InputsReceived { peer_id, data } => match AvatarInput::decode(&data) {
                Some(input) => {
                    self.world.apply_input(u32::from(peer_id), &input, dt);
                }
                None => log::debug!("Malformed input from peer {}", peer_id),
            },
            ServerEvent::Error { message } => log::error!("{}", message),
        }
    }

    fn log_stats(&self) {
        log::info!(
            "{} peers, {} entities, {} pending handshakes",
            self.server.peer_count(),
            self.world.len(),
            self.server.pending_connection_count()
        );
        for peer_id in self.server.connected_peer_ids() {
            if let Some(stats) = self.server.peer_stats(peer_id) {
                log::info!(
                    "  peer {}: rtt {:.1}ms, sent {} / recv {} packets, {:.1}% loss, {} resends",
                    peer_id,
                    stats.rtt_ms,
                    stats.packets_sent,
                    stats.packets_received,
                    stats.packet_loss_percent,
                    stats.retransmissions
                );
            }
        }
    }
}
