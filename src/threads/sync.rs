//! Sync worker: fixed-cadence state mirroring and edge-triggered requests.
//!
//! Owns the outbound UDP socket and the one-shot request client. Each loop
//! iteration drains pending device-status updates (edge detection must see
//! every transition), forwards rate-limited manual commands, then lets the
//! synchronizer decide whether a periodic frame is due. Send failures are
//! logged and forgotten; the next tick carries fresh state anyway.

use std::net::UdpSocket;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SarathiConfig;
use crate::link::messages::{DeviceCommand, DeviceStatus, OneShotRequest, OutboundFrame};
use crate::link::request::RequestClient;
use crate::link::wire::{Serializer, WireFormat};
use crate::shared::SharedState;
use crate::sync::StateSynchronizer;

/// Loop granularity; well under the send cadence
const LOOP_SLICE: Duration = Duration::from_millis(20);

/// Sync worker state and logic.
pub struct SyncThread {
    config: SarathiConfig,
    shared: Arc<SharedState>,
    status_rx: Receiver<DeviceStatus>,
    manual_rx: Receiver<DeviceCommand>,
    synchronizer: StateSynchronizer,
    serializer: Serializer,
    requests: RequestClient,
    socket: Option<UdpSocket>,
    send_buffer: Vec<u8>,
}

impl SyncThread {
    pub fn new(
        config: SarathiConfig,
        shared: Arc<SharedState>,
        status_rx: Receiver<DeviceStatus>,
        manual_rx: Receiver<DeviceCommand>,
    ) -> Self {
        let serializer = Serializer::new(WireFormat::from_config(&config.connection.wire_format));
        let requests = RequestClient::new(
            serializer,
            Duration::from_millis(config.sync.request_timeout_ms),
        );
        let synchronizer = StateSynchronizer::new(config.sync.clone());
        Self {
            config,
            shared,
            status_rx,
            manual_rx,
            synchronizer,
            serializer,
            requests,
            socket: None,
            send_buffer: Vec::new(),
        }
    }

    /// Run the sync worker main loop.
    pub fn run(&mut self) {
        tracing::info!("Sync worker started");

        self.socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::error!("Sync worker could not bind UDP socket: {}", e);
                None
            }
        };

        loop {
            if self.shared.should_shutdown() {
                break;
            }

            self.process_status_updates();
            self.process_manual_commands();

            let now = Instant::now();
            let nav = self.shared.nav_snapshot();
            let decision = self.shared.decision_snapshot();
            if let Some(frame) =
                self.synchronizer
                    .tick(now, self.shared.link_state(), &nav, &decision)
            {
                self.send_frame(&OutboundFrame::State(frame));
            }

            std::thread::sleep(LOOP_SLICE);
        }

        tracing::info!("Sync worker stopped");
    }

    /// Drain inbound status updates; every transition feeds edge detection.
    fn process_status_updates(&mut self) {
        while let Ok(status) = self.status_rx.try_recv() {
            let nav = self.shared.nav_snapshot();
            if let Some(request) = self.synchronizer.observe_status(&status, &nav) {
                self.send_request(&request);
            }
        }
    }

    fn process_manual_commands(&mut self) {
        while let Ok(command) = self.manual_rx.try_recv() {
            let now = Instant::now();
            if let Some(frame) = self.synchronizer.manual_command(now, command) {
                self.send_frame(&frame);
            }
        }
    }

    fn send_frame(&mut self, frame: &OutboundFrame) {
        let socket = match self.socket.as_ref() {
            Some(s) => s,
            None => return,
        };
        let ip = match self.shared.device_ip() {
            Some(ip) => ip,
            None => return,
        };

        if let Err(e) = self.serializer.encode_datagram(frame, &mut self.send_buffer) {
            tracing::warn!("Failed to encode outbound frame: {}", e);
            return;
        }
        let target = (ip.as_str(), self.config.connection.telemetry_port);
        if let Err(e) = socket.send_to(&self.send_buffer, target) {
            // Swallowed: the next tick retries with fresh state
            tracing::warn!("Outbound send failed: {}", e);
        }
    }

    fn send_request(&self, request: &OneShotRequest) {
        let ip = match self.shared.device_ip() {
            Some(ip) => ip,
            None => {
                tracing::debug!("One-shot request dropped: no device known");
                return;
            }
        };
        let addr = self.config.request_address(&ip);
        match self.requests.send(&addr, request) {
            Ok(reply) if reply.ok => {
                tracing::info!("One-shot request acknowledged");
            }
            Ok(reply) => {
                tracing::warn!(
                    "One-shot request rejected: {}",
                    reply.message.as_deref().unwrap_or("no reason given")
                );
            }
            Err(e) => {
                tracing::warn!("One-shot request failed: {}", e);
            }
        }
    }
}
