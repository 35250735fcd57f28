//! Outbound state synchronization.
//!
//! Mirrors the locally known navigation state to the device on a fixed
//! cadence, plus two out-of-cadence paths:
//!
//! - Edge-triggered: when device status transitions into "automation active
//!   but no route confirmed", a one-shot destination confirmation is issued
//!   once, on the transition only. The previous predicate value is an
//!   explicit field here so the edge detection is testable in isolation.
//! - Manual: user-triggered commands bypass the cadence but respect a
//!   minimum inter-send spacing.
//!
//! There is no retry queue: every frame is rebuilt from the latest snapshot,
//! so after a send failure the next tick naturally carries current state.

use crate::config::SyncConfig;
use crate::decision::OvertakeDecision;
use crate::link::messages::{
    DeviceCommand, DeviceStatus, OneShotRequest, OutboundFrame, OutboundStateFrame,
};
use crate::link::LinkState;
use crate::shared::NavSnapshot;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Fixed lead subtracted from short speed-limit distances before sending.
/// The device expects this early bias; results may go negative near the
/// limit point and are transmitted as-is.
const LIMIT_DISTANCE_LEAD_M: f32 = 30.0;
/// Distances at or above this are sent unadjusted (m)
const LIMIT_DISTANCE_NEAR_M: f32 = 100.0;

/// Cadence and edge-trigger bookkeeping for outbound sends.
pub struct StateSynchronizer {
    config: SyncConfig,
    seq: u64,
    /// Previous value of "route not confirmed AND automation active"
    prev_confirm_predicate: bool,
    last_periodic: Option<Instant>,
    last_manual: Option<Instant>,
}

impl StateSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            seq: 0,
            prev_confirm_predicate: false,
            last_periodic: None,
            last_manual: None,
        }
    }

    /// Periodic cadence. Returns a frame to send when the interval has
    /// elapsed and the link is connected; an elapsed interval while not
    /// connected consumes the tick without queueing anything.
    pub fn tick(
        &mut self,
        now: Instant,
        link: LinkState,
        nav: &NavSnapshot,
        decision: &OvertakeDecision,
    ) -> Option<OutboundStateFrame> {
        let interval = Duration::from_millis(self.config.interval_ms);
        match self.last_periodic {
            Some(at) if now.duration_since(at) < interval => return None,
            _ => {}
        }
        self.last_periodic = Some(now);

        if link != LinkState::Connected {
            return None;
        }

        Some(self.build_frame(nav, decision))
    }

    /// Process one inbound device status update.
    ///
    /// Fires a destination confirmation exactly once per rising edge of
    /// "route not confirmed AND automation active", and only when a non-zero
    /// destination is known.
    pub fn observe_status(
        &mut self,
        status: &DeviceStatus,
        nav: &NavSnapshot,
    ) -> Option<OneShotRequest> {
        let predicate = !status.route_active && status.automation_active;
        let rising = predicate && !self.prev_confirm_predicate;
        self.prev_confirm_predicate = predicate;

        if !rising {
            return None;
        }

        let point = match nav.destination {
            Some(p) if !p.is_zero() => p,
            _ => {
                debug!("Confirm edge observed but no destination known");
                return None;
            }
        };

        info!(
            "Automation active without confirmed route, confirming destination {:?}",
            nav.destination_name.as_deref().unwrap_or("(unnamed)")
        );
        Some(OneShotRequest::ConfirmDestination {
            point,
            name: nav.destination_name.clone(),
        })
    }

    /// Immediate user-triggered command, limited to one per minimum spacing.
    pub fn manual_command(&mut self, now: Instant, command: DeviceCommand) -> Option<OutboundFrame> {
        let spacing = Duration::from_millis(self.config.min_manual_spacing_ms);
        if let Some(at) = self.last_manual {
            if now.duration_since(at) < spacing {
                debug!("Manual command {:?} dropped: spacing not met", command);
                return None;
            }
        }
        self.last_manual = Some(now);
        Some(OutboundFrame::Command(command))
    }

    /// Build the periodic state mirror from the latest snapshots.
    fn build_frame(&mut self, nav: &NavSnapshot, decision: &OvertakeDecision) -> OutboundStateFrame {
        self.seq += 1;
        OutboundStateFrame {
            seq: self.seq,
            road_speed_limit_kph: nav.road_speed_limit_kph,
            speed_limit_distance_m: nav.speed_limit_distance_m.map(adjusted_limit_distance),
            destination: nav.destination,
            destination_name: nav.destination_name.clone(),
            route_active: nav.route_active,
            automation_active: nav.automation_active,
            overtake_allowed: decision.can_overtake,
            overtake_direction: decision.last_direction,
        }
    }
}

/// Apply the short-distance lead to a speed-limit distance.
fn adjusted_limit_distance(distance_m: f32) -> f32 {
    if distance_m > 0.0 && distance_m < LIMIT_DISTANCE_NEAR_M {
        distance_m - LIMIT_DISTANCE_LEAD_M
    } else {
        distance_m
    }
}
