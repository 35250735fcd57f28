//! Telemetry link to the in-vehicle unit.
//!
//! The connection lifecycle is an explicit state machine so every transition
//! is unit-testable without a socket:
//!
//! ```text
//! Disconnected → Connecting → Connected → (drop) → Reconnecting
//!                                   ↑______________/      |
//!                                                         v (3 failures)
//!                                                       Failed
//! ```
//!
//! `Failed` is terminal until an external reset (typically a fresh discovery
//! announce). The socket-driving loop lives in `threads::link`; this module
//! owns only the transition logic and per-link statistics.

pub mod messages;
pub mod request;
pub mod wire;

use std::time::{Duration, Instant};

/// Reconnect attempts after a drop before the link gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// The device currently on the other end of the link.
///
/// Exactly one endpoint is current at a time, owned by the link worker.
/// `last_seen` is refreshed on every received packet; a TCP connection can
/// die silently, so an endpoint that stays quiet past the silence window is
/// treated like a dropped connection.
#[derive(Debug, Clone)]
pub struct DeviceEndpoint {
    pub ip: String,
    pub last_seen: Instant,
    /// Connect round-trip time, as a rough latency hint
    pub latency_hint_ms: Option<u32>,
}

impl DeviceEndpoint {
    pub fn new(ip: String, now: Instant, latency_hint_ms: Option<u32>) -> Self {
        Self {
            ip,
            last_seen: now,
            latency_hint_ms,
        }
    }

    /// Record traffic from the device.
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// Whether the device has been silent past the window.
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.last_seen) > window
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Failed = 4,
}

impl LinkState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => LinkState::Connecting,
            2 => LinkState::Connected,
            3 => LinkState::Reconnecting,
            4 => LinkState::Failed,
            _ => LinkState::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Failed => "failed",
        }
    }
}

/// Four-state connection indicator for status display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkIndicator {
    Disconnected,
    Reconnecting,
    /// Connected but no sample received within the last second
    ConnectedIdle,
    ConnectedActive,
}

/// Outcome of applying an event to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub changed: bool,
    /// Set on the single transition into `Failed` after exhausting retries
    pub exhausted: bool,
}

const NO_CHANGE: Transition = Transition {
    changed: false,
    exhausted: false,
};
const CHANGED: Transition = Transition {
    changed: true,
    exhausted: false,
};

/// Explicit transition function for the link lifecycle.
///
/// Invariant: at most one connection attempt is in flight; `on_connect` is a
/// no-op while already connecting or connected to the same target.
#[derive(Debug)]
pub struct LinkStateMachine {
    state: LinkState,
    target_ip: Option<String>,
    attempts: u32,
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            target_ip: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn target_ip(&self) -> Option<&str> {
        self.target_ip.as_deref()
    }

    /// Request a connection to `ip`.
    ///
    /// No-op while connecting/connected to the same address. A different
    /// address tears the old target down first. `Failed` stays terminal here;
    /// use `on_reset` for an explicit retry.
    pub fn on_connect(&mut self, ip: &str) -> Transition {
        let same_target = self.target_ip.as_deref() == Some(ip);
        match self.state {
            LinkState::Connecting | LinkState::Connected | LinkState::Reconnecting
                if same_target =>
            {
                NO_CHANGE
            }
            LinkState::Failed => NO_CHANGE,
            _ => {
                self.target_ip = Some(ip.to_string());
                self.state = LinkState::Connecting;
                self.attempts = 0;
                CHANGED
            }
        }
    }

    /// External reset out of `Failed` (or retarget from any state)
    pub fn on_reset(&mut self, ip: &str) -> Transition {
        self.target_ip = Some(ip.to_string());
        self.state = LinkState::Connecting;
        self.attempts = 0;
        CHANGED
    }

    /// A connection attempt succeeded
    pub fn on_established(&mut self) -> Transition {
        match self.state {
            LinkState::Connecting | LinkState::Reconnecting => {
                self.state = LinkState::Connected;
                self.attempts = 0;
                CHANGED
            }
            _ => NO_CHANGE,
        }
    }

    /// The established connection dropped (read error, EOF, oversized frame)
    pub fn on_drop(&mut self) -> Transition {
        match self.state {
            LinkState::Connected => {
                self.state = LinkState::Reconnecting;
                self.attempts = 0;
                CHANGED
            }
            _ => NO_CHANGE,
        }
    }

    /// A connect attempt failed (refused or timed out).
    ///
    /// An initial-connect failure enters the reconnect sequence without
    /// consuming one of its attempts; each failure while reconnecting counts,
    /// and the third moves the link to `Failed` with `exhausted` set exactly
    /// once.
    pub fn on_attempt_failed(&mut self) -> Transition {
        match self.state {
            LinkState::Connecting => {
                self.state = LinkState::Reconnecting;
                self.attempts = 0;
                CHANGED
            }
            LinkState::Reconnecting => {
                self.attempts += 1;
                if self.attempts >= MAX_RECONNECT_ATTEMPTS {
                    self.state = LinkState::Failed;
                    Transition {
                        changed: true,
                        exhausted: true,
                    }
                } else {
                    NO_CHANGE
                }
            }
            _ => NO_CHANGE,
        }
    }

    /// Graceful teardown; idempotent
    pub fn on_disconnect(&mut self) -> Transition {
        if self.state == LinkState::Disconnected {
            return NO_CHANGE;
        }
        self.state = LinkState::Disconnected;
        self.target_ip = None;
        self.attempts = 0;
        CHANGED
    }
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-link statistics for monitoring stream health
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    /// Frames successfully parsed
    pub rx_frames: u64,
    /// Frames dropped because the payload failed to deserialize
    pub malformed_frames: u64,
    /// Out-of-order or duplicate sequence numbers observed
    pub out_of_order: u64,
    /// Completed reconnects since startup
    pub reconnects: u64,
    /// Receipt time of the most recent telemetry sample
    pub last_sample_at: Option<Instant>,
}

impl LinkStats {
    /// Map link state plus stream activity onto the status indicator
    pub fn indicator(&self, state: LinkState, now: Instant) -> LinkIndicator {
        match state {
            LinkState::Connected => match self.last_sample_at {
                Some(at) if now.duration_since(at).as_millis() <= 1000 => {
                    LinkIndicator::ConnectedActive
                }
                _ => LinkIndicator::ConnectedIdle,
            },
            LinkState::Connecting | LinkState::Reconnecting => LinkIndicator::Reconnecting,
            LinkState::Disconnected | LinkState::Failed => LinkIndicator::Disconnected,
        }
    }
}
