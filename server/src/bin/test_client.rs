//! Scripted player for poking a running server: logs in, walks towards the
//! nearest known factory and acts on whatever it reaches.

use bincode::{deserialize, serialize};
use clap::Parser;
use log::{info, warn};
use shared::{FactoryView, Location, Packet, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Player account to log in as
    #[arg(short, long, default_value = "1")]
    user: u32,

    /// Meters walked per step
    #[arg(long, default_value = "15")]
    step: f64,

    #[arg(long, default_value = "52.52", allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, default_value = "13.405", allow_hyphen_values = true)]
    lng: f64,
}

async fn send(socket: &UdpSocket, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
    socket.send(&serialize(packet)?).await?;
    Ok(())
}

/// Moves `from` up to `step_m` meters towards `to`
fn step_towards(from: Location, to: Location, step_m: f64) -> Location {
    let distance = from.distance_m(&to);
    if distance <= step_m {
        return to;
    }
    let t = step_m / distance;
    Location::new(
        from.lat + (to.lat - from.lat) * t,
        from.lng + (to.lng - from.lng) * t,
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(args.server).await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    send(
        &socket,
        &Packet::Connect {
            client_version: PROTOCOL_VERSION,
            user_id: args.user,
        },
    )
    .await?;

    let mut position = Location::new(args.lat, args.lng);
    let mut sequence = 0u32;
    let mut factories: HashMap<u32, FactoryView> = HashMap::new();
    let mut buffer = [0u8; 2048];
    let mut step = interval(Duration::from_secs(1));

    loop {
        step.tick().await;

        while let Ok(Ok(len)) = timeout(Duration::from_millis(10), socket.recv(&mut buffer)).await {
            match deserialize::<Packet>(&buffer[..len]) {
                Ok(Packet::FactoryState(view)) => {
                    factories.insert(view.id, view);
                }
                Ok(Packet::Disconnected { reason }) => {
                    warn!("Disconnected: {}", reason);
                    return Ok(());
                }
                Ok(packet) => info!("<- {:?}", packet),
                Err(e) => warn!("Malformed packet: {}", e),
            }
        }

        let target = factories
            .values()
            .min_by(|a, b| {
                position
                    .distance_m(&a.location)
                    .total_cmp(&position.distance_m(&b.location))
            })
            .cloned();

        if let Some(factory) = target {
            if factory.in_range {
                let action = if !factory.ally {
                    Packet::Attack {
                        factory: factory.id,
                    }
                } else if factory.stock_out > 0 {
                    Packet::Collect {
                        factory: factory.id,
                    }
                } else {
                    Packet::Ping {
                        factory: factory.id,
                    }
                };
                info!("-> {:?}", action);
                send(&socket, &action).await?;
            } else {
                position = step_towards(position, factory.location, args.step);
            }
        }

        sequence += 1;
        send(
            &socket,
            &Packet::UpdateLocation {
                sequence,
                location: position,
            },
        )
        .await?;
    }
}
