use clap::Parser;
use log::info;
use server::config::HubConfig;
use server::listener::{Listener, ListenerSettings};
use server::registry::HubRegistry;
use server::room::{MemoryRoomStore, Room, RoomStore};
use std::sync::Arc;
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

    /// Capacity for rooms created on demand (0 = unlimited)
    #[arg(short, long, default_value = "0")]
    capacity: usize,

    /// Envelopes buffered per member before it is evicted
    #[arg(long, default_value = "8")]
    queue_depth: usize,

    /// Milliseconds of silence before a peer is considered dead
    #[arg(long, default_value = "60000")]
    read_timeout_ms: u64,

    /// Milliseconds a single frame write may take
    #[arg(long, default_value = "10000")]
    write_timeout_ms: u64,

    /// Largest accepted envelope payload in bytes
    #[arg(long, default_value_t = shared::DEFAULT_MAX_PAYLOAD_SIZE)]
    max_payload: usize,

    /// Predefined room as id=name[:capacity[:tempo]] (repeatable)
    #[arg(short, long = "room")]
    rooms: Vec<Room>,

    /// Create unknown rooms when someone asks to join them
    #[arg(long)]
    auto_create: bool,

    /// Echo each member's messages back to it
    #[arg(long)]
    echo: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let defaults = HubConfig::default()
        .with_outbound_queue_depth(args.queue_depth)
        .with_read_timeout(Duration::from_millis(args.read_timeout_ms))
        .with_write_timeout(Duration::from_millis(args.write_timeout_ms))
        .with_max_payload_size(args.max_payload)
        .with_echo_to_sender(args.echo);

    let rooms = Arc::new(MemoryRoomStore::with_rooms(args.rooms));
    for room in rooms.list() {
        info!(
            "Room {} ({}): capacity {}, tempo {}",
            room.id, room.name, room.capacity, room.tempo
        );
    }

    let hubs = Arc::new(HubRegistry::new(defaults));
    let settings = ListenerSettings {
        auto_create: args.auto_create,
        default_capacity: args.capacity,
        ..ListenerSettings::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let listener = Listener::bind(&address, rooms, Arc::clone(&hubs), settings).await?;

    tokio::select! {
        _ = listener.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    hubs.close_all().await;
    // Let writers flush their close frames
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
