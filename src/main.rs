//! Sarathi - companion daemon for an in-vehicle driving-assistance unit.
//!
//! Connects to the unit over the local network, consumes its telemetry
//! stream, mirrors navigation state back on a fixed cadence, and maintains
//! a debounced overtake-eligibility signal.
//!
//! ## Multi-Threaded Architecture
//!
//! - **Discovery thread**: listens for the unit's UDP announces
//! - **Link thread** (10-20 Hz inbound): connection lifecycle, telemetry
//!   read loop, per-sample decision evaluation
//! - **Sync thread** (~5 Hz outbound): periodic state mirror, edge-triggered
//!   one-shot requests, manual commands

use sarathi::config::SarathiConfig;
use sarathi::discovery::DiscoveryClient;
use sarathi::error::Result;
use sarathi::link::messages::DeviceAnnounce;
use sarathi::shared::SharedState;
use sarathi::threads::spawn_threads;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sarathi=info".parse().unwrap()),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    let config = if args.len() > 1 && !args[1].starts_with("--") {
        let config_path = Path::new(&args[1]);
        info!("Loading configuration from {:?}", config_path);
        SarathiConfig::load(config_path)?
    } else {
        let device_ip = args
            .iter()
            .position(|a| a == "--device")
            .and_then(|i| args.get(i + 1))
            .cloned();

        let mut config = if Path::new("sarathi.toml").exists() {
            info!("Loading configuration from sarathi.toml");
            SarathiConfig::load(Path::new("sarathi.toml"))?
        } else {
            info!("Using default configuration");
            SarathiConfig::default()
        };

        if let Some(ip) = device_ip {
            info!("Using device IP: {}", ip);
            config.connection.device_ip = ip;
        }

        config
    };

    info!("Sarathi v{}", env!("CARGO_PKG_VERSION"));

    let shared = Arc::new(SharedState::new());

    // Announce channel: discovery and the static config both feed it
    let (announce_tx, announce_rx) = mpsc::channel::<DeviceAnnounce>();

    if !config.connection.device_ip.is_empty() {
        info!("Device preconfigured at {}", config.connection.device_ip);
        let seeded = DeviceAnnounce {
            ip: config.connection.device_ip.clone(),
            port: Some(config.connection.telemetry_port),
            name: None,
            version: None,
            route_active: None,
            automation_active: None,
        };
        let _ = announce_tx.send(seeded);
    }

    let mut discovery = DiscoveryClient::new(config.discovery.clone(), announce_tx);
    discovery.start();

    // Spawn worker threads
    let handles = spawn_threads(config, Arc::clone(&shared), announce_rx)?;

    // Shutdown on SIGINT/SIGTERM
    let signal_shared = Arc::clone(&shared);
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).map_err(sarathi::error::SarathiError::Connection)?;
    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, shutting down", sig);
                signal_shared.signal_shutdown();
            }
        })
        .expect("Failed to spawn signal thread");

    // Main thread: monitor
    let check_interval = Duration::from_millis(500);
    let mut exhausted_reported = false;
    let mut last_indicator = shared.indicator();

    loop {
        std::thread::sleep(check_interval);

        if shared.should_shutdown() {
            break;
        }

        let indicator = shared.indicator();
        if indicator != last_indicator {
            info!("Connection: {:?}", indicator);
            last_indicator = indicator;
        }

        if shared.is_reconnect_exhausted() && !exhausted_reported {
            warn!("Device unreachable after repeated attempts; waiting for a new announce");
            exhausted_reported = true;
        } else if !shared.is_reconnect_exhausted() {
            exhausted_reported = false;
        }

        if handles.link.is_finished() || handles.sync.is_finished() {
            warn!("A worker thread exited unexpectedly");
            shared.signal_shutdown();
            break;
        }
    }

    // Wait for threads to finish
    info!("Waiting for threads to finish...");
    discovery.stop();

    if let Err(e) = handles.link.join() {
        error!("Link thread panicked: {:?}", e);
    }
    if let Err(e) = handles.sync.join() {
        error!("Sync thread panicked: {:?}", e);
    }

    info!("Sarathi finished");
    Ok(())
}
