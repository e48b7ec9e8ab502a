use clap::Parser;
use log::info;
use server::config::GameConfig;
use server::game::{unix_millis, GameState};
use server::network::{Server, ServerMessage};
use server::store::{DocumentStore, JsonStore, MemoryStore, WorldDocument};
use shared::Location;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "10")]
    tick_rate: u32,

    /// Maximum concurrent clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// JSON world file; the world is kept in memory only when omitted
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// JSON game balance file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed a demo world around --lat/--lng when no world exists yet
    #[arg(long)]
    demo: bool,

    #[arg(long, default_value = "52.52", allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, default_value = "13.405", allow_hyphen_values = true)]
    lng: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let now = unix_millis();

    let config = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };

    let seed = if args.demo {
        WorldDocument::demo(Location::new(args.lat, args.lng), now)
    } else {
        WorldDocument::empty(1)
    };

    let store: Box<dyn DocumentStore> = match &args.store {
        Some(path) => Box::new(JsonStore::open(path, seed)?),
        None => Box::new(MemoryStore::new(seed)),
    };

    let game = GameState::new(store, config, now)?;

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        Duration::from_secs(args.timeout),
        game,
    )
    .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await?;

    Ok(())
}
