//! Shared state for the multi-threaded daemon.
//!
//! Single-writer discipline: the link worker owns `LinkState`, the decision
//! snapshot and the stream statistics; the sync worker only reads them; the
//! navigation snapshot is written by the external navigation collaborator.
//! Readers always take whole-struct clones so no one can observe a decision
//! mid-update.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use crate::decision::{ConditionCheck, OvertakeDecision};
use crate::link::messages::{DeviceStatus, GeoPoint};
use crate::link::{LinkIndicator, LinkState, LinkStats};

/// Locally known navigation state, refreshed asynchronously by the
/// navigation collaborator and mirrored to the device each send cycle.
#[derive(Debug, Clone, Default)]
pub struct NavSnapshot {
    pub road_speed_limit_kph: Option<u16>,
    pub speed_limit_distance_m: Option<f32>,
    pub destination: Option<GeoPoint>,
    pub destination_name: Option<String>,
    pub route_active: bool,
    pub automation_active: bool,
}

/// Shared state between all threads.
#[derive(Debug)]
pub struct SharedState {
    /// Shutdown signal for graceful termination
    shutdown: AtomicBool,

    /// Current link state (written only by the link worker)
    link_state: AtomicU8,

    /// Latched once when the reconnect budget is exhausted, until cleared
    /// by a successful reset
    reconnect_exhausted: AtomicBool,

    /// IP of the device currently targeted by the link worker
    device_ip: RwLock<Option<String>>,

    /// Latest navigation snapshot from the navigation collaborator
    nav: RwLock<NavSnapshot>,

    /// Latest device status frame
    status: RwLock<Option<DeviceStatus>>,

    /// Current overtake decision (written only by the link worker)
    decision: RwLock<OvertakeDecision>,

    /// Condition battery from the most recent evaluation, for diagnostics
    checks: RwLock<Vec<ConditionCheck>>,

    /// Stream statistics (written only by the link worker)
    stats: RwLock<LinkStats>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            link_state: AtomicU8::new(LinkState::Disconnected.as_u8()),
            reconnect_exhausted: AtomicBool::new(false),
            device_ip: RwLock::new(None),
            nav: RwLock::new(NavSnapshot::default()),
            status: RwLock::new(None),
            decision: RwLock::new(OvertakeDecision::default()),
            checks: RwLock::new(Vec::new()),
            stats: RwLock::new(LinkStats::default()),
        }
    }

    /// Signal shutdown.
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Check if shutdown is signaled.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.link_state.load(Ordering::Acquire))
    }

    /// Publish a link state transition (link worker only).
    pub fn set_link_state(&self, state: LinkState) {
        self.link_state.store(state.as_u8(), Ordering::Release);
        if state == LinkState::Connected {
            self.reconnect_exhausted.store(false, Ordering::Release);
        }
    }

    /// Latch the exhausted-retries event (fires the UI prompt once).
    pub fn set_reconnect_exhausted(&self) {
        self.reconnect_exhausted.store(true, Ordering::Release);
    }

    pub fn is_reconnect_exhausted(&self) -> bool {
        self.reconnect_exhausted.load(Ordering::Acquire)
    }

    /// Record the device the link is targeting (link worker only).
    pub fn set_device_ip(&self, ip: Option<String>) {
        if let Ok(mut guard) = self.device_ip.write() {
            *guard = ip;
        }
    }

    pub fn device_ip(&self) -> Option<String> {
        self.device_ip.read().ok().and_then(|g| g.clone())
    }

    /// Replace the navigation snapshot (navigation collaborator only).
    pub fn update_nav(&self, nav: NavSnapshot) {
        if let Ok(mut guard) = self.nav.write() {
            *guard = nav;
        }
    }

    /// Consistent copy of the navigation snapshot.
    pub fn nav_snapshot(&self) -> NavSnapshot {
        self.nav
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Store the latest device status (link worker only).
    pub fn set_device_status(&self, status: DeviceStatus) {
        if let Ok(mut guard) = self.status.write() {
            *guard = Some(status);
        }
    }

    pub fn device_status(&self) -> Option<DeviceStatus> {
        self.status.read().ok().and_then(|g| *g)
    }

    /// Publish the updated decision and its condition battery (link worker only).
    pub fn publish_decision(&self, decision: OvertakeDecision, checks: Vec<ConditionCheck>) {
        if let Ok(mut guard) = self.decision.write() {
            *guard = decision;
        }
        if let Ok(mut guard) = self.checks.write() {
            *guard = checks;
        }
    }

    /// Consistent copy of the current decision.
    pub fn decision_snapshot(&self) -> OvertakeDecision {
        self.decision
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Condition battery from the most recent evaluation.
    pub fn condition_checks(&self) -> Vec<ConditionCheck> {
        self.checks.read().map(|g| g.clone()).unwrap_or_default()
    }

    /// Publish stream statistics (link worker only).
    pub fn publish_stats(&self, stats: LinkStats) {
        if let Ok(mut guard) = self.stats.write() {
            *guard = stats;
        }
    }

    pub fn stats_snapshot(&self) -> LinkStats {
        self.stats.read().map(|g| g.clone()).unwrap_or_default()
    }

    /// Four-state connection indicator for status display.
    pub fn indicator(&self) -> LinkIndicator {
        let stats = self.stats_snapshot();
        stats.indicator(self.link_state(), Instant::now())
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_round_trips_through_atomic() {
        let shared = SharedState::new();
        assert_eq!(shared.link_state(), LinkState::Disconnected);

        shared.set_link_state(LinkState::Reconnecting);
        assert_eq!(shared.link_state(), LinkState::Reconnecting);
    }

    #[test]
    fn exhausted_flag_clears_on_reconnect() {
        let shared = SharedState::new();
        shared.set_reconnect_exhausted();
        assert!(shared.is_reconnect_exhausted());

        shared.set_link_state(LinkState::Connected);
        assert!(!shared.is_reconnect_exhausted());
    }

    #[test]
    fn decision_snapshot_is_a_consistent_copy() {
        let shared = SharedState::new();
        let mut decision = OvertakeDecision::default();
        decision.can_overtake = true;
        decision.cooldown_remaining_ms = 0;
        shared.publish_decision(decision, Vec::new());

        let copy = shared.decision_snapshot();
        assert!(copy.can_overtake);

        // Later publications do not affect the copy already taken
        shared.publish_decision(OvertakeDecision::default(), Vec::new());
        assert!(copy.can_overtake);
        assert!(!shared.decision_snapshot().can_overtake);
    }

    #[test]
    fn nav_snapshot_defaults_to_empty() {
        let shared = SharedState::new();
        let nav = shared.nav_snapshot();
        assert!(nav.destination.is_none());
        assert!(!nav.route_active);
    }
}
