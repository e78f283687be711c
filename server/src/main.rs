use clap::Parser;
use log::{error, info};
use server::game::{Game, Simulation};
use server::hub::Hub;
use server::network::Listener;
use server::world::World;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (scheduling callbacks per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
    /// World width in units
    #[clap(long, default_value = "512")]
    width: f64,
    /// World height in units
    #[clap(long, default_value = "512")]
    height: f64,
    /// Side length of a map block, in units
    #[clap(long, default_value = "4")]
    block_size: u32,
    /// Origin allowed to open WebSocket connections
    #[clap(long, default_value = "http://localhost:8080")]
    origin: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let world = World::new(args.width, args.height, args.block_size);
    let game = Arc::new(RwLock::new(Game::new(world)));

    let (hub, handle) = Hub::new(Arc::clone(&game));
    let mut hub_task = tokio::spawn(hub.run());

    let mut simulation = Simulation::new(Arc::clone(&game));
    simulation.start(args.tick_rate, handle.outbound_sender());

    let address = format!("{}:{}", args.host, args.port);
    let listener = Listener::bind(&address, args.origin).await?;
    let listener_task = tokio::spawn(listener.serve(handle.clone()));

    tokio::select! {
        result = &mut hub_task => {
            if let Err(e) = result {
                error!("Hub task panicked: {}", e);
            }
            listener_task.abort();
            simulation.stop().await;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
        }
    }

    // Stop accepting, drop every connection, then halt the simulation.
    listener_task.abort();
    handle.shutdown();
    if let Err(e) = hub_task.await {
        error!("Hub task panicked: {}", e);
    }
    simulation.stop().await;

    Ok(())
}
