use log::{info, warn};
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use pinhub::{
    AppState, CommandEngine, DuplicatePins, EdgeDispatcher, GlobalConfig, PinRegistry, api_scope,
    spawn_edge_monitor,
};

#[cfg(feature = "hardware-gpio")]
use pinhub::LibgpiodProvider;
#[cfg(not(feature = "hardware-gpio"))]
use pinhub::MockLineProvider;

const EDGE_CHANNEL_CAPACITY: usize = 64;
const SNAPSHOT_FANOUT_CAPACITY: usize = 16;

fn sys_name() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PINHUB_CONFIG").ok())
        .unwrap_or_else(|| "pinhub.conf".to_string());
    let config = GlobalConfig::load_from_file(&config_path, DuplicatePins::default())
        .unwrap_or_else(|e| panic!("Failed to load config: {e}"));
    if !config.valid {
        warn!("config file {config_path} is unreadable, starting with no pins");
    }

    let provider = {
        #[cfg(feature = "hardware-gpio")]
        {
            let chip = std::env::var("PINHUB_CHIP").unwrap_or_else(|_| "/dev/gpiochip0".into());
            LibgpiodProvider::new(chip)
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            MockLineProvider::default()
        }
    };

    let edges = Arc::new(EdgeDispatcher::new(EDGE_CHANNEL_CAPACITY));
    let edge_rx = edges.subscribe();
    let registry = PinRegistry::bind(config, &provider, edges.clone(), &config_path)
        .unwrap_or_else(|e| panic!("Failed to bind pins: {e}"));

    let engine = Arc::new(CommandEngine::new(
        Arc::new(Mutex::new(registry)),
        sys_name(),
    ));
    let (snapshots, _) = broadcast::channel(SNAPSHOT_FANOUT_CAPACITY);
    spawn_edge_monitor(engine.clone(), edge_rx, snapshots.clone());

    let state = AppState { engine, snapshots };
    let listen = std::env::var("PINHUB_LISTEN").unwrap_or_else(|_| "0.0.0.0:8084".to_string());
    info!("Starting server on {listen}...");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(api_scope(""))
    })
    .bind(&listen)?
    .run()
    .await
}
