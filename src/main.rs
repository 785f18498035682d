use std::error::Error;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use log::{info, warn};
use simplelog::{ConfigBuilder, WriteLogger};
use tokio::task::JoinHandle;

use widget_driver::client::{ClientTurnServer, Direction, LocalClient, RelationsResponse};
use widget_driver::core::config::{self, CliOverrides, ResolvedConfig};
use widget_driver::widget::{ContentMap, RelationsQuery, WidgetDriver, WidgetKind};

#[derive(Parser)]
#[command(name = "widget-driver", about = "Drive a widget against an in-process chat client")]
struct Args {
    /// Config file (defaults to ~/.widget-driver/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Room the widget is mounted in
    #[arg(short, long)]
    room: Option<String>,

    /// Where the widget is mounted
    #[arg(short, long, value_enum)]
    kind: Option<WidgetKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print TURN servers (JSON lines) as the widget receives them
    TurnServers {
        /// Number of servers to wait for
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Send to-device messages and print what was delivered
    SendToDevice {
        #[arg(short = 't', long = "type")]
        event_type: String,
        #[arg(short, long)]
        encrypted: bool,
        /// JSON content map: {"@user:server": {"DEVICE" or "*": {...}}}
        contents: String,
    },
    /// Read relations of an event from a stored relation page
    Relations {
        event_id: String,
        /// JSON file holding the relation page
        #[arg(long)]
        page: PathBuf,
        #[arg(long)]
        rel_type: Option<String>,
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        /// "f" or "b"
        #[arg(long)]
        direction: Option<Direction>,
    },
}

/// Builds the in-process client from config: devices, capability flag and
/// the first configured TURN server as the current list.
fn local_client(resolved: &ResolvedConfig) -> Arc<LocalClient> {
    let client = Arc::new(LocalClient::new(resolved.turn_polling));
    for entry in &resolved.devices {
        client.add_device(entry.user_id.clone(), entry.device_info());
    }
    if let Some(first) = resolved.turn_servers.first() {
        client.set_turn_servers(vec![first.clone()]);
    }
    client
}

/// Publishes the configured servers one after another, forever.
fn spawn_rotation(
    client: Arc<LocalClient>,
    servers: Vec<ClientTurnServer>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if servers.is_empty() {
            return;
        }
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // completes immediately
        for server in servers.iter().cycle().skip(1) {
            interval.tick().await;
            client.set_turn_servers(vec![server.clone()]);
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let file_config = config::load_config(args.config.as_deref())?;
    let resolved = config::resolve(
        &file_config,
        &CliOverrides {
            room_id: args.room.as_deref(),
            kind: args.kind,
        },
    );

    // Initialize file logger
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    if let Ok(log_file) = File::create(&resolved.log_file) {
        let _ = WriteLogger::init(resolved.log_level, log_config, log_file);
    }

    let client = local_client(&resolved);
    let driver = WidgetDriver::new(
        client.clone(),
        resolved.allowed_capabilities.clone(),
        resolved.widget.clone(),
        resolved.kind,
        resolved.room_id.clone(),
    );

    info!(
        "Driving widget {} ({:?}) at {}",
        driver.widget().id,
        driver.kind(),
        driver.widget().url
    );

    match args.command {
        Command::TurnServers { count } => {
            let rotation = spawn_rotation(
                Arc::clone(&client),
                resolved.turn_servers.clone(),
                Duration::from_millis(resolved.rotate_interval_ms),
            );

            let mut servers = Box::pin(driver.get_turn_servers().into_stream().take(count));
            let mut yielded = 0usize;
            while let Some(server) = servers.next().await {
                println!("{}", serde_json::to_string(&server?)?);
                yielded += 1;
            }
            if yielded == 0 {
                warn!("No TURN servers: discovery is not active");
                eprintln!("TURN server discovery is not active");
            }
            rotation.abort();
        }
        Command::SendToDevice {
            event_type,
            encrypted,
            contents,
        } => {
            let contents: ContentMap = serde_json::from_str(&contents)?;
            driver
                .send_to_device(&event_type, encrypted, &contents)
                .await?;
            for message in client.outbox() {
                println!("{}", serde_json::to_string(&message)?);
            }
        }
        Command::Relations {
            event_id,
            page,
            rel_type,
            event_type,
            limit,
            direction,
        } => {
            let room_id = resolved
                .room_id
                .clone()
                .ok_or("no room: pass --room or set widget.room_id")?;
            let stored: RelationsResponse = serde_json::from_str(&fs::read_to_string(&page)?)?;
            client.insert_relations(room_id.clone(), event_id.clone(), stored);

            let query = RelationsQuery {
                event_id,
                room_id: Some(room_id),
                rel_type,
                event_type,
                from: None,
                to: None,
                limit,
                direction,
            };
            let result = driver.read_event_relations(&query).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
