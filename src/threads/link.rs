//! Link worker: owns the telemetry socket and the decision engine.
//!
//! This thread drives the connection lifecycle (connect, reconnect with a
//! bounded budget, terminal failure until a fresh announce), reads framed
//! telemetry, and evaluates each sample synchronously on the delivery path.
//! Nothing here may panic or propagate an error out of the loop: a bad
//! frame is dropped and counted, a dead connection becomes a state
//! transition.

use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SarathiConfig;
use crate::decision::OvertakeEngine;
use crate::link::messages::{DeviceAnnounce, DeviceFrame, DeviceStatus};
use crate::link::wire::{read_frame, Serializer, WireFormat};
use crate::link::{DeviceEndpoint, LinkState, LinkStateMachine, LinkStats};
use crate::shared::SharedState;

/// How often stream statistics are published
const STATS_INTERVAL: Duration = Duration::from_secs(1);
/// Poll slice while idle or backing off, to stay responsive to shutdown
const IDLE_SLICE: Duration = Duration::from_millis(100);

/// Link worker state and logic.
pub struct LinkThread {
    config: SarathiConfig,
    shared: Arc<SharedState>,
    announce_rx: Receiver<DeviceAnnounce>,
    status_tx: SyncSender<DeviceStatus>,
    machine: LinkStateMachine,
    engine: OvertakeEngine,
    serializer: Serializer,
    stream: Option<TcpStream>,
    endpoint: Option<DeviceEndpoint>,
    stats: LinkStats,
    read_buffer: Vec<u8>,
    last_seq: Option<u64>,
    last_stats_publish: Instant,
}

impl LinkThread {
    pub fn new(
        config: SarathiConfig,
        shared: Arc<SharedState>,
        announce_rx: Receiver<DeviceAnnounce>,
        status_tx: SyncSender<DeviceStatus>,
    ) -> Self {
        let engine = OvertakeEngine::new(config.overtake.clone());
        let serializer = Serializer::new(WireFormat::from_config(&config.connection.wire_format));
        Self {
            config,
            shared,
            announce_rx,
            status_tx,
            machine: LinkStateMachine::new(),
            engine,
            serializer,
            stream: None,
            endpoint: None,
            stats: LinkStats::default(),
            read_buffer: Vec::new(),
            last_seq: None,
            last_stats_publish: Instant::now(),
        }
    }

    /// Run the link worker main loop.
    pub fn run(&mut self) {
        tracing::info!("Link worker started");

        loop {
            if self.shared.should_shutdown() {
                self.teardown();
                let t = self.machine.on_disconnect();
                if t.changed {
                    self.publish_state();
                }
                break;
            }

            self.drain_announces();

            match self.machine.state() {
                LinkState::Disconnected | LinkState::Failed => {
                    // Nothing to drive; wait for an announce
                    if let Ok(announce) = self.announce_rx.recv_timeout(IDLE_SLICE) {
                        self.handle_announce(announce);
                    }
                }
                LinkState::Connecting | LinkState::Reconnecting => {
                    self.attempt_connect();
                }
                LinkState::Connected => {
                    self.read_cycle();
                }
            }

            self.publish_stats_if_due();
        }

        tracing::info!("Link worker stopped");
    }

    fn drain_announces(&mut self) {
        while let Ok(announce) = self.announce_rx.try_recv() {
            self.handle_announce(announce);
        }
    }

    fn handle_announce(&mut self, announce: DeviceAnnounce) {
        let ip = announce.ip;
        let transition = if self.machine.state() == LinkState::Failed {
            tracing::info!("Fresh announce from {}, retrying failed link", ip);
            self.machine.on_reset(&ip)
        } else {
            self.machine.on_connect(&ip)
        };

        if transition.changed {
            // Retarget: the old connection goes down before the new attempt
            self.teardown();
            self.shared.set_device_ip(Some(ip));
            self.publish_state();
        }
    }

    fn attempt_connect(&mut self) {
        let addr_string = match self.machine.target_ip() {
            Some(ip) => self.config.telemetry_address(ip),
            None => return,
        };
        let timeout = Duration::from_millis(self.config.connection.connect_timeout_ms);

        let sock_addr = addr_string
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next());
        let attempt_started = Instant::now();
        let result = match sock_addr {
            Some(addr) => TcpStream::connect_timeout(&addr, timeout),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid address {}", addr_string),
            )),
        };

        match result {
            Ok(stream) => {
                let was_reconnect = self.machine.state() == LinkState::Reconnecting;
                if let Err(e) = stream.set_read_timeout(Some(Duration::from_millis(
                    self.config.connection.read_timeout_ms,
                ))) {
                    tracing::warn!("Failed to set read timeout: {}", e);
                }
                self.stream = Some(stream);
                self.last_seq = None;
                let now = Instant::now();
                let connect_rtt = now.duration_since(attempt_started).as_millis() as u32;
                self.endpoint = self.machine.target_ip().map(|ip| {
                    DeviceEndpoint::new(ip.to_string(), now, Some(connect_rtt))
                });
                if was_reconnect {
                    self.stats.reconnects += 1;
                }
                if self.machine.on_established().changed {
                    tracing::info!("Connected to {} (rtt {} ms)", addr_string, connect_rtt);
                    self.publish_state();
                }
            }
            Err(e) => {
                tracing::warn!("Connect to {} failed: {}", addr_string, e);
                let transition = self.machine.on_attempt_failed();
                if transition.exhausted {
                    tracing::error!(
                        "Reconnect attempts exhausted for {}, link failed until next announce",
                        addr_string
                    );
                    self.shared.set_reconnect_exhausted();
                }
                if transition.changed {
                    self.publish_state();
                }
                if self.machine.state() == LinkState::Reconnecting {
                    self.backoff();
                }
            }
        }
    }

    /// Sleep the reconnect backoff in small slices so shutdown stays prompt.
    fn backoff(&mut self) {
        let total = Duration::from_millis(self.config.connection.reconnect_backoff_ms);
        let started = Instant::now();
        loop {
            let remaining = match total.checked_sub(started.elapsed()) {
                Some(r) if !r.is_zero() => r,
                _ => return,
            };
            if self.shared.should_shutdown() {
                return;
            }
            std::thread::sleep(IDLE_SLICE.min(remaining));
        }
    }

    fn read_cycle(&mut self) {
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return,
        };

        match read_frame(stream, &mut self.read_buffer) {
            Ok(Some(len)) => {
                // Any packet counts as life from the endpoint
                if let Some(endpoint) = self.endpoint.as_mut() {
                    endpoint.touch(Instant::now());
                }
                let payload = &self.read_buffer[..len];
                match self.serializer.decode::<DeviceFrame>(payload) {
                    Ok(frame) => {
                        self.stats.rx_frames += 1;
                        self.dispatch(frame);
                    }
                    Err(e) => {
                        // One bad frame never takes the link down
                        self.stats.malformed_frames += 1;
                        tracing::debug!("Dropped malformed frame: {}", e);
                    }
                }
            }
            Ok(None) => {
                // Read timeout. A dead TCP connection can stay quiet
                // forever, so prolonged endpoint silence counts as a drop.
                let window = Duration::from_millis(self.config.connection.silence_window_ms);
                let stale = self
                    .endpoint
                    .as_ref()
                    .is_some_and(|e| e.is_stale(Instant::now(), window));
                if stale {
                    tracing::warn!(
                        "Device silent for more than {} ms, recycling connection",
                        self.config.connection.silence_window_ms
                    );
                    self.teardown();
                    if self.machine.on_drop().changed {
                        self.publish_state();
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Telemetry stream lost: {}", e);
                self.teardown();
                if self.machine.on_drop().changed {
                    self.publish_state();
                }
            }
        }
    }

    fn dispatch(&mut self, frame: DeviceFrame) {
        match frame {
            DeviceFrame::Sample(sample) => {
                let now = Instant::now();
                if let Some(last) = self.last_seq {
                    if sample.seq <= last {
                        self.stats.out_of_order += 1;
                        tracing::debug!(
                            "Sample out of order: seq {} after {}",
                            sample.seq,
                            last
                        );
                    }
                }
                self.last_seq = Some(sample.seq);
                self.stats.last_sample_at = Some(now);

                self.engine.evaluate(&sample, now);
                self.shared
                    .publish_decision(self.engine.decision().clone(), self.engine.checks().to_vec());
            }
            DeviceFrame::Status(status) => {
                self.shared.set_device_status(status);
                match self.status_tx.try_send(status) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("Status channel full, update dropped");
                    }
                }
            }
            DeviceFrame::ManeuverReport(report) => {
                self.engine.on_maneuver_report(&report);
                self.shared
                    .publish_decision(self.engine.decision().clone(), self.engine.checks().to_vec());
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.endpoint = None;
        self.last_seq = None;
    }

    fn publish_state(&self) {
        self.shared.set_link_state(self.machine.state());
        tracing::info!("Link state: {}", self.machine.state().as_str());
    }

    fn publish_stats_if_due(&mut self) {
        if self.last_stats_publish.elapsed() >= STATS_INTERVAL {
            self.shared.publish_stats(self.stats.clone());
            self.last_stats_publish = Instant::now();
        }
    }
}
