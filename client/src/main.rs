use clap::Parser;
use client::display;
use client::input::{self, Command};
use client::network::RoomClient;
use log::{info, warn};
use rand::Rng;
use shared::{Handshake, DEFAULT_SERVER_ADDR};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = DEFAULT_SERVER_ADDR)]
    server: String,

    /// Room to join
    #[arg(short = 'r', long, default_value = "lobby")]
    room: String,

    /// Display name shown to other members
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// User id presented to the server
    #[arg(short = 'u', long)]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let tag: u16 = rand::thread_rng().gen_range(1000..10000);
    let name = args.name.unwrap_or_else(|| format!("guest-{}", tag));
    let user_id = args.user_id.unwrap_or_else(|| format!("{}-{}", name, tag));

    info!("Connecting to {} as {} ({})", args.server, name, user_id);
    let hello = Handshake::new(args.room.clone(), user_id, name);
    let mut room = RoomClient::connect(&args.server, &hello).await?;
    println!("Joined {}. Type to talk, /event <payload> to send an event, /quit to leave.", args.room);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            incoming = room.recv() => match incoming? {
                Some(envelope) => println!("{}", display::render(&envelope)),
                None => {
                    println!("Disconnected by server");
                    return Ok(());
                }
            },
            line = lines.next_line() => {
                let command = match line? {
                    Some(line) => input::parse_line(&line),
                    None => Command::Quit,
                };
                match command {
                    Command::Quit => break,
                    Command::Nothing => {}
                    Command::Unknown(name) => warn!("Unknown command /{}", name),
                    command => {
                        if let Some(envelope) = command.to_envelope() {
                            room.send(&envelope).await?;
                        }
                    }
                }
            }
        }
    }

    room.leave().await?;
    Ok(())
}
