use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use strand::{
    Client, ClientEvent, ClientState, ConditionedSocket, DatagramSocket, UdpDatagramSocket,
};
use strand_demo::{AvatarInput, DemoWorld, InputFlags};

use crate::config::ClientConfig;

/// Drives a [`Client`] at a fixed tick rate, steering its avatar in a circle.
pub struct NetworkClient {
    client: Client<Box<dyn DatagramSocket>>,
    world: DemoWorld,
    config: ClientConfig,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    start_time: Instant,
    elapsed: f32,
    input_sequence: u32,
    report_timer: f32,
}

impl NetworkClient {
    pub fn new(bind_addr: &str, config: ClientConfig) -> io::Result<Self> {
        let udp = UdpDatagramSocket::bind(bind_addr)?;
        let socket: Box<dyn DatagramSocket> = match &config.packet_loss {
            Some(conditions) => Box::new(ConditionedSocket::new(udp, conditions.clone())),
            None => Box::new(udp),
        };

        Ok(Self {
            client: Client::new(socket, config.network.clone()),
            world: DemoWorld::new(),
            tick_duration: Duration::from_secs_f64(1.0 / f64::from(config.tick_rate)),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            start_time: Instant::now(),
            elapsed: 0.0,
            input_sequence: 0,
            report_timer: 0.0,
            config,
        })
    }

    pub fn connect(&mut self, server: SocketAddr) -> Result<()> {
        self.client.connect(server)?;
        Ok(())
    }

    /// Runs until the time limit, a disconnect, or a failed handshake.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self
                .config
                .run_for
                .is_some_and(|limit| self.start_time.elapsed() >= limit)
            {
                break;
            }

            let now = Instant::now();
            self.accumulator += now - self.last_tick_time;
            self.last_tick_time = now;
            while self.accumulator >= self.tick_duration {
                self.accumulator -= self.tick_duration;
                self.tick()?;
            }

            match self.client.state() {
                ClientState::Failed(reason) => bail!("connection failed: {}", reason),
                ClientState::Disconnected => {
                    log::info!("Disconnected from server");
                    return Ok(());
                }
                ClientState::Connecting | ClientState::Connected => {}
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        self.client.disconnect(&mut self.world)?;
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        let dt = self.tick_duration.as_secs_f32();
        self.elapsed += dt;

        if self.client.is_connected() {
            self.send_input()?;
        }
        self.client.tick(dt, &mut self.world)?;

        for event in self.client.drain_events() {
            match event {
                ClientEvent::Connected { peer_id } => {
                    log::info!("Connected as peer {}", peer_id);
                }
                ClientEvent::Disconnected { reason } => {
                    log::info!("Server connection {}", reason.as_str());
                }
                ClientEvent::ConnectionFailed { reason } => {
                    log::error!("Connection failed: {}", reason);
                }
                ClientEvent::Error { message } => log::error!("{}", message),
            }
        }

        self.report_timer += dt;
        if self.report_timer >= self.config.report_interval_seconds {
            self.report_timer = 0.0;
            self.report();
        }
        Ok(())
    }

    fn send_input(&mut self) -> Result<()> {
        self.input_sequence += 1;
        let angle = self.elapsed * 0.5;
        let input = AvatarInput {
            sequence: self.input_sequence,
            move_direction: [angle.cos(), 0.0, angle.sin()],
            flags: if (self.elapsed as u32) % 10 < 3 {
                InputFlags::SPRINT
            } else {
                InputFlags::empty()
            },
        };
        self.client.send_inputs(&input.encode())?;
        Ok(())
    }

    fn report(&self) {
        if !self.client.is_connected() {
            return;
        }
        let local_peer_id = u32::from(self.client.local_peer_id());
        let rtt_ms = self.client.stats().map_or(0.0, |s| s.rtt_ms);
        log::info!(
            "server time {:.2}s (synced: {}), rtt {:.1}ms, {} avatars",
            self.client.server_time_seconds(),
            self.client.is_time_synchronized(),
            rtt_ms,
            self.world.len()
        );
        for avatar in self.world.avatars() {
            let state = avatar.state();
            let marker = if avatar.controlled_by_peer_id == local_peer_id {
                " (you)"
            } else {
                ""
            };
            log::info!(
                "  entity {} of peer {}{} at ({:.2}, {:.2}, {:.2})",
                avatar.network_entity_id,
                avatar.controlled_by_peer_id,
                marker,
                state.position.x,
                state.position.y,
                state.position.z
            );
        }
    }
}
