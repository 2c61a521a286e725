use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

/// Relay server for the proximity tag game
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Distance at which It passes to another player
    #[clap(short, long, default_value = "3.0")]
    tag_distance: f32,
    /// Seconds between failsafe checks that someone is It
    #[clap(long, default_value = "15")]
    failsafe_secs: u64,
    /// Largest accepted inbound frame, excluding the newline
    #[clap(long, default_value = "1023")]
    max_frame_bytes: usize,
    /// Only tag from the periodic scan, not on every position update
    #[clap(long)]
    no_event_tagging: bool,
    /// Seed for the failsafe's random choice
    #[clap(long)]
    seed: Option<u64>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            tag_distance: args.tag_distance,
            failsafe_interval: Duration::from_secs(args.failsafe_secs),
            max_frame_bytes: args.max_frame_bytes,
            event_driven_tagging: !args.no_event_tagging,
            rng_seed: args.seed,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config: ServerConfig = Args::parse().into();

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let handle = server.spawn()?;
    info!("Listening on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    handle.shutdown().await;

    Ok(())
}
