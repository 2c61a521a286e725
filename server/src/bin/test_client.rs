//! Manual test client: walks a straight line and prints what the server sends.

use clap::Parser;
use shared::{ClientMessage, ServerMessage, Vec3, YOU_ARE_IT};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Starting x coordinate
    #[clap(short = 'x', long, default_value = "0.0")]
    start_x: f32,
    /// Distance moved along x per step
    #[clap(long, default_value = "0.5")]
    step: f32,
    /// Number of position updates to send (0 = just listen)
    #[clap(short, long, default_value = "20")]
    count: u32,
    /// Milliseconds between updates
    #[clap(short, long, default_value = "100")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {} from {}", args.server, stream.local_addr()?);

    let (reader, mut writer) = stream.into_split();

    let printer = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match ServerMessage::decode(line.as_bytes()) {
                Ok(ServerMessage::PlayerTagged { server_id }) if server_id == YOU_ARE_IT => {
                    println!("You are It!");
                }
                Ok(message) => println!("Received: {:?}", message),
                Err(e) => println!("Unreadable message ({}): {}", e, line),
            }
        }
        println!("Server closed the connection");
    });

    for i in 0..args.count {
        let position = Vec3::new(args.start_x + args.step * i as f32, 0.0, 0.0);
        writer
            .write_all(&ClientMessage::Position(position).encode()?)
            .await?;
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    if args.count > 0 {
        println!("Done moving, listening (Ctrl+C to quit)");
    }

    tokio::select! {
        _ = printer => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    Ok(())
}
