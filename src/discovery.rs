//! Device discovery.
//!
//! The in-vehicle unit announces itself with a small JSON datagram broadcast
//! on the local network at ~10 Hz. The listener suppresses repeat announces
//! for an IP inside a debounce window and forwards each genuinely new (or
//! re-aged) address to the link worker. Discovery failure is silent: if no
//! announce ever arrives, the callback simply never fires.

use crate::config::DiscoveryConfig;
use crate::link::messages::DeviceAnnounce;
use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Largest announce datagram we accept
const ANNOUNCE_BUFFER_SIZE: usize = 2048;

/// Debounce filter for repeated announces.
///
/// Fires at most once per distinct IP within the window; an announce for a
/// new IP always passes immediately.
#[derive(Debug)]
pub struct AnnounceFilter {
    window: Duration,
    last_fired: HashMap<String, Instant>,
}

impl AnnounceFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: HashMap::new(),
        }
    }

    /// Whether an announce for `ip` at `now` should be forwarded.
    pub fn accept(&mut self, ip: &str, now: Instant) -> bool {
        match self.last_fired.get(ip) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                self.last_fired.insert(ip.to_string(), now);
                true
            }
        }
    }
}

/// UDP announce listener owning its own short-lived thread.
pub struct DiscoveryClient {
    config: DiscoveryConfig,
    tx: Sender<DeviceAnnounce>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryClient {
    pub fn new(config: DiscoveryConfig, tx: Sender<DeviceAnnounce>) -> Self {
        Self {
            config,
            tx,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Begin listening for announces; calling while already started is a no-op.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let port = self.config.port;
        let window = Duration::from_millis(self.config.debounce_ms);
        let running = Arc::clone(&self.running);
        let tx = self.tx.clone();

        let handle = std::thread::Builder::new()
            .name("discovery".into())
            .spawn(move || {
                let socket = match UdpSocket::bind(("0.0.0.0", port)) {
                    Ok(s) => s,
                    Err(e) => {
                        // Silent failure semantics: log once and give up
                        warn!("Discovery listener failed to bind port {}: {}", port, e);
                        running.store(false, Ordering::Release);
                        return;
                    }
                };
                if let Err(e) = socket.set_read_timeout(Some(Duration::from_millis(500))) {
                    warn!("Failed to set discovery read timeout: {}", e);
                }

                info!("Discovery listening on UDP port {}", port);
                let mut filter = AnnounceFilter::new(window);
                let mut buffer = [0u8; ANNOUNCE_BUFFER_SIZE];

                while running.load(Ordering::Acquire) {
                    let (len, from) = match socket.recv_from(&mut buffer) {
                        Ok(r) => r,
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            warn!("Discovery receive error: {}", e);
                            continue;
                        }
                    };

                    let announce: DeviceAnnounce =
                        match serde_json::from_slice(&buffer[..len]) {
                            Ok(a) => a,
                            Err(e) => {
                                debug!("Ignoring malformed announce from {}: {}", from, e);
                                continue;
                            }
                        };

                    if !filter.accept(&announce.ip, Instant::now()) {
                        continue;
                    }

                    info!(
                        "Device announce: {} ({})",
                        announce.ip,
                        announce.name.as_deref().unwrap_or("unnamed")
                    );
                    if tx.send(announce).is_err() {
                        // Receiver gone, nothing left to notify
                        break;
                    }
                }

                info!("Discovery listener stopped");
            })
            .expect("Failed to spawn discovery thread");

        self.handle = Some(handle);
    }

    /// Release the listening resource; safe to call multiple times.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Discovery thread panicked during shutdown");
            }
        }
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.stop();
    }
}
