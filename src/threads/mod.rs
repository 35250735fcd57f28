//! Multi-threaded architecture for the Sarathi daemon.
//!
//! Separates concerns into two workers over shared state:
//! - Link worker: connection lifecycle, telemetry read loop, per-sample
//!   decision evaluation
//! - Sync worker: fixed-cadence outbound state, edge-triggered requests,
//!   manual commands
//!
//! Discovery runs its own listener thread, owned by `DiscoveryClient`.

mod link;
mod sync;

pub use link::LinkThread;
pub use sync::SyncThread;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::SarathiConfig;
use crate::error::Result;
use crate::link::messages::{DeviceAnnounce, DeviceCommand, DeviceStatus};
use crate::shared::SharedState;

/// Status updates buffered between the link and sync workers
const STATUS_CHANNEL_DEPTH: usize = 32;

/// Thread handles for the running daemon.
pub struct ThreadHandles {
    pub link: JoinHandle<()>,
    pub sync: JoinHandle<()>,
    /// Entry point for user-triggered device commands
    pub manual_tx: Sender<DeviceCommand>,
}

/// Spawn the link and sync workers.
///
/// `announce_rx` feeds device announces (from discovery or a configured
/// address) into the link worker.
pub fn spawn_threads(
    config: SarathiConfig,
    shared: Arc<SharedState>,
    announce_rx: Receiver<DeviceAnnounce>,
) -> Result<ThreadHandles> {
    // Bounded so a stalled sync worker cannot pile up status updates
    let (status_tx, status_rx) = mpsc::sync_channel::<DeviceStatus>(STATUS_CHANNEL_DEPTH);
    let (manual_tx, manual_rx) = mpsc::channel::<DeviceCommand>();

    let link_config = config.clone();
    let link_shared = Arc::clone(&shared);
    let link_handle = thread::Builder::new()
        .name("link".into())
        .spawn(move || {
            let mut worker = LinkThread::new(link_config, link_shared, announce_rx, status_tx);
            worker.run();
        })
        .expect("Failed to spawn link thread");

    let sync_config = config;
    let sync_shared = Arc::clone(&shared);
    let sync_handle = thread::Builder::new()
        .name("sync".into())
        .spawn(move || {
            let mut worker = SyncThread::new(sync_config, sync_shared, status_rx, manual_rx);
            worker.run();
        })
        .expect("Failed to spawn sync thread");

    Ok(ThreadHandles {
        link: link_handle,
        sync: sync_handle,
        manual_tx,
    })
}
