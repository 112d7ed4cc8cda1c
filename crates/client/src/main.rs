mod client;
mod config;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use client::NetworkClient;
use config::ClientConfig;
use strand::PacketLossSimulation;

#[derive(Parser)]
#[command(name = "strand-client")]
#[command(about = "Headless demo client")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1", help = "Server host to connect to")]
    server: String,

    #[arg(short, long, default_value_t = strand::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: String,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, help = "Disconnect after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Enable packet loss simulation on outgoing traffic")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = format!("{}:{}", args.server, args.port).parse()?;

    let packet_loss = args.simulate_packet_loss.then(|| PacketLossSimulation {
        enabled: true,
        loss_percent: args.loss_percent,
        min_latency_ms: args.min_latency,
        max_latency_ms: args.max_latency,
        jitter_ms: args.jitter,
    });

    let config = ClientConfig {
        tick_rate: args.tick_rate,
        packet_loss,
        run_for: args.duration.map(Duration::from_secs),
        ..Default::default()
    };

    let mut client = NetworkClient::new(&args.bind, config)?;
    client.connect(server_addr)?;
    client.run()
}
