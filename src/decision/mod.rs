//! Overtake decision engine.
//!
//! Each inbound telemetry sample is evaluated against a fixed, ordered
//! battery of safety conditions. All conditions must hold, for a configured
//! number of consecutive evaluations, before eligibility flips true. Two
//! gates short-circuit the battery: a disabled overtake mode and an active
//! post-maneuver cooldown. Missing data fails the affected condition
//! (fail-closed); the absence of a lead vehicle is the only exception.
//!
//! Evaluation is pure computation on the sample-delivery path: no I/O, no
//! blocking, one sample processed to completion before the next.

use crate::config::{OvertakeConfig, OvertakeMode};
use crate::link::messages::{
    Direction, LaneChangePhase, ManeuverOutcome, ManeuverReport, TelemetrySample,
};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info};

/// Readings kept for lane-number stabilization
const LANE_HISTORY: usize = 8;
/// Consecutive identical readings required before the published lane changes
const LANE_STABLE_READINGS: usize = 3;
/// Fallback lane width when the sample carries none (m)
const FALLBACK_LANE_WIDTH: f32 = 3.2;

/// The current overtake eligibility result.
///
/// Owned and mutated exclusively by [`OvertakeEngine`]; everyone else reads
/// cloned snapshots. Default state is unknown/blocked.
#[derive(Debug, Clone)]
pub struct OvertakeDecision {
    pub can_overtake: bool,
    pub blocking_reason: Option<String>,
    pub cooldown_remaining_ms: u64,
    pub last_direction: Direction,
    /// Estimated current lane, 1-based from the left; 0 while unknown
    pub current_lane: u32,
    pub total_lanes: u32,
    pub status_text: String,
}

impl Default for OvertakeDecision {
    fn default() -> Self {
        Self {
            can_overtake: false,
            blocking_reason: Some("awaiting telemetry".to_string()),
            cooldown_remaining_ms: 0,
            last_direction: Direction::None,
            current_lane: 0,
            total_lanes: 0,
            status_text: "unknown".to_string(),
        }
    }
}

/// One row of the diagnostic condition table.
///
/// Produced fresh on every evaluation; never persisted.
#[derive(Debug, Clone)]
pub struct ConditionCheck {
    pub name: &'static str,
    pub threshold: String,
    pub actual: String,
    pub satisfied: bool,
    pub has_data: bool,
}

impl ConditionCheck {
    fn ok(name: &'static str, threshold: String, actual: String) -> Self {
        Self {
            name,
            threshold,
            actual,
            satisfied: true,
            has_data: true,
        }
    }

    fn fail(name: &'static str, threshold: String, actual: String) -> Self {
        Self {
            name,
            threshold,
            actual,
            satisfied: false,
            has_data: true,
        }
    }

    fn missing(name: &'static str, threshold: String) -> Self {
        Self {
            name,
            threshold,
            actual: "no data".to_string(),
            satisfied: false,
            has_data: false,
        }
    }
}

/// Per-sample evaluator maintaining the debounced eligibility result.
pub struct OvertakeEngine {
    config: OvertakeConfig,
    decision: OvertakeDecision,
    checks: Vec<ConditionCheck>,
    consecutive_passes: u32,
    last_eval_at: Option<Instant>,
    lane_readings: VecDeque<(u32, u32)>,
}

impl OvertakeEngine {
    pub fn new(config: OvertakeConfig) -> Self {
        let decision = OvertakeDecision {
            total_lanes: config.default_total_lanes,
            ..Default::default()
        };
        Self {
            config,
            decision,
            checks: Vec::new(),
            consecutive_passes: 0,
            last_eval_at: None,
            lane_readings: VecDeque::with_capacity(LANE_HISTORY),
        }
    }

    pub fn decision(&self) -> &OvertakeDecision {
        &self.decision
    }

    /// Condition battery from the most recent evaluation, in order.
    pub fn checks(&self) -> &[ConditionCheck] {
        &self.checks
    }

    /// Arm the post-maneuver cooldown.
    ///
    /// Called when the device reports a maneuver outcome; suppresses
    /// re-triggering on borderline condition values.
    pub fn on_maneuver_report(&mut self, report: &ManeuverReport) {
        let cooldown = match report.outcome {
            ManeuverOutcome::Completed => self.config.cooldown_completed_ms,
            ManeuverOutcome::Aborted => self.config.cooldown_aborted_ms,
        };
        self.decision.cooldown_remaining_ms = cooldown;
        self.decision.can_overtake = false;
        self.decision.last_direction = report.direction;
        self.decision.blocking_reason = Some(format!(
            "cooldown after {} maneuver",
            match report.outcome {
                ManeuverOutcome::Completed => "completed",
                ManeuverOutcome::Aborted => "aborted",
            }
        ));
        self.consecutive_passes = 0;
        info!(
            "Cooldown armed: {}ms after {:?} maneuver ({})",
            cooldown,
            report.outcome,
            report.direction.as_str()
        );
    }

    /// Evaluate one telemetry sample and update the decision in place.
    ///
    /// `received_at` is the local receipt time; cooldown countdown uses the
    /// wall-clock delta between receipt times, not the sample count.
    pub fn evaluate(&mut self, sample: &TelemetrySample, received_at: Instant) -> &OvertakeDecision {
        self.tick_cooldown(received_at);
        self.update_lane_estimate(sample);

        // The battery is recomputed every call for the diagnostics table,
        // even while a gate blocks the result.
        let (checks, side) = self.run_battery(sample);
        self.checks = checks;

        if self.config.mode == OvertakeMode::Disabled {
            self.consecutive_passes = 0;
            self.block("overtake mode disabled");
            return &self.decision;
        }

        if self.decision.cooldown_remaining_ms > 0 {
            self.consecutive_passes = 0;
            let remaining = self.decision.cooldown_remaining_ms;
            self.block(&format!(
                "cooldown: {:.1}s remaining",
                remaining as f64 / 1000.0
            ));
            return &self.decision;
        }

        let first_fail = self
            .checks
            .iter()
            .find(|c| !c.satisfied)
            .map(|c| format!("{}: {}", c.name, c.actual));
        if let Some(reason) = first_fail {
            self.consecutive_passes = 0;
            self.block(&reason);
            return &self.decision;
        }

        self.consecutive_passes = self.consecutive_passes.saturating_add(1);
        if self.consecutive_passes < self.config.stable_evaluations {
            self.block(&format!(
                "conditions holding ({}/{})",
                self.consecutive_passes, self.config.stable_evaluations
            ));
            return &self.decision;
        }

        if !self.decision.can_overtake {
            info!("Overtake eligible: {} side clear", side.as_str());
        }
        self.decision.can_overtake = true;
        self.decision.blocking_reason = None;
        self.decision.last_direction = side;
        self.decision.status_text = format!("ready ({})", side.as_str());
        &self.decision
    }

    fn tick_cooldown(&mut self, received_at: Instant) {
        if let Some(prev) = self.last_eval_at {
            let delta_ms = received_at.duration_since(prev).as_millis() as u64;
            if self.decision.cooldown_remaining_ms > 0 && delta_ms > 0 {
                self.decision.cooldown_remaining_ms =
                    self.decision.cooldown_remaining_ms.saturating_sub(delta_ms);
                if self.decision.cooldown_remaining_ms == 0 {
                    info!("Cooldown expired");
                }
            }
        }
        self.last_eval_at = Some(received_at);
    }

    fn block(&mut self, reason: &str) {
        self.decision.can_overtake = false;
        self.decision.blocking_reason = Some(reason.to_string());
        self.decision.status_text = format!("blocked: {}", reason);
    }

    /// Run the ordered condition battery.
    ///
    /// Returns the checks and the destination side they were evaluated for.
    /// In auto mode the left side is preferred; the right side is evaluated
    /// only when the left's side-specific conditions fail.
    fn run_battery(&self, sample: &TelemetrySample) -> (Vec<ConditionCheck>, Direction) {
        let mut checks = Vec::with_capacity(10);
        checks.push(self.check_ego_speed(sample));
        checks.push(self.check_steering(sample));
        checks.push(self.check_lane_change(sample));
        checks.push(self.check_lead_presence(sample));
        checks.push(self.check_lead_speed(sample));
        checks.push(self.check_curvature(sample));

        let (side_checks, side) = match self.config.mode {
            OvertakeMode::Left => (self.side_battery(sample, Direction::Left), Direction::Left),
            OvertakeMode::Right => (self.side_battery(sample, Direction::Right), Direction::Right),
            // Disabled still evaluates a side for the diagnostics table
            OvertakeMode::Auto | OvertakeMode::Disabled => {
                let left = self.side_battery(sample, Direction::Left);
                if left.iter().all(|c| c.satisfied) {
                    (left, Direction::Left)
                } else {
                    let right = self.side_battery(sample, Direction::Right);
                    if right.iter().all(|c| c.satisfied) {
                        (right, Direction::Right)
                    } else {
                        // Neither side passes; report the preferred side
                        (left, Direction::Left)
                    }
                }
            }
        };
        checks.extend(side_checks);
        (checks, side)
    }

    fn check_ego_speed(&self, sample: &TelemetrySample) -> ConditionCheck {
        let threshold = format!(">= {:.0} km/h", self.config.min_overtake_speed_kph);
        match sample.v_ego_kph {
            Some(v) if v >= self.config.min_overtake_speed_kph => {
                ConditionCheck::ok("ego_speed", threshold, format!("{:.0} km/h", v))
            }
            Some(v) => ConditionCheck::fail(
                "ego_speed",
                threshold,
                format!(
                    "{:.0} km/h below minimum {:.0} km/h",
                    v, self.config.min_overtake_speed_kph
                ),
            ),
            None => ConditionCheck::missing("ego_speed", threshold),
        }
    }

    fn check_steering(&self, sample: &TelemetrySample) -> ConditionCheck {
        let threshold = format!("|angle| <= {:.0} deg", self.config.max_steering_angle_deg);
        match sample.steering_angle_deg {
            Some(a) if a.abs() <= self.config.max_steering_angle_deg => {
                ConditionCheck::ok("steering_angle", threshold, format!("{:.1} deg", a))
            }
            Some(a) => ConditionCheck::fail(
                "steering_angle",
                threshold,
                format!("driver steering at {:.1} deg", a),
            ),
            None => ConditionCheck::missing("steering_angle", threshold),
        }
    }

    fn check_lane_change(&self, sample: &TelemetrySample) -> ConditionCheck {
        let threshold = "no lane change in progress".to_string();
        match sample.lane_change_phase {
            Some(LaneChangePhase::Idle) => {
                ConditionCheck::ok("lane_change", threshold, "idle".to_string())
            }
            Some(phase) => ConditionCheck::fail(
                "lane_change",
                threshold,
                format!("lane change {:?} in progress", phase),
            ),
            None => ConditionCheck::missing("lane_change", threshold),
        }
    }

    fn check_lead_presence(&self, sample: &TelemetrySample) -> ConditionCheck {
        let threshold = format!(
            "within {:.0} m at prob >= {:.2}, or absent",
            self.config.max_lead_distance_m, self.config.min_lead_prob
        );
        match sample.lead {
            // Absence of a lead vehicle does not block
            None => ConditionCheck::ok("lead_presence", threshold, "no lead".to_string()),
            Some(lead) => {
                if lead.distance_m > self.config.max_lead_distance_m {
                    ConditionCheck::fail(
                        "lead_presence",
                        threshold,
                        format!("lead at {:.0} m beyond tracking range", lead.distance_m),
                    )
                } else if lead.prob < self.config.min_lead_prob {
                    ConditionCheck::fail(
                        "lead_presence",
                        threshold,
                        format!("lead probability {:.2} too low", lead.prob),
                    )
                } else {
                    ConditionCheck::ok(
                        "lead_presence",
                        threshold,
                        format!("lead at {:.0} m, prob {:.2}", lead.distance_m, lead.prob),
                    )
                }
            }
        }
    }

    fn check_lead_speed(&self, sample: &TelemetrySample) -> ConditionCheck {
        let threshold = format!(
            "lead >= {:.0} km/h and ego-lead >= {:.0} km/h",
            self.config.min_lead_speed_kph, self.config.min_speed_advantage_kph
        );
        let lead = match sample.lead {
            None => {
                return ConditionCheck::ok("lead_speed", threshold, "no lead".to_string());
            }
            Some(l) => l,
        };
        let ego = match sample.v_ego_kph {
            Some(v) => v,
            None => return ConditionCheck::missing("lead_speed", threshold),
        };

        if lead.speed_kph < self.config.min_lead_speed_kph {
            return ConditionCheck::fail(
                "lead_speed",
                threshold,
                format!(
                    "lead at {:.0} km/h suggests congestion",
                    lead.speed_kph
                ),
            );
        }
        let advantage = ego - lead.speed_kph;
        if advantage < self.config.min_speed_advantage_kph {
            return ConditionCheck::fail(
                "lead_speed",
                threshold,
                format!("speed advantage {:.0} km/h insufficient", advantage),
            );
        }
        ConditionCheck::ok(
            "lead_speed",
            threshold,
            format!("lead {:.0} km/h, advantage {:.0} km/h", lead.speed_kph, advantage),
        )
    }

    fn check_curvature(&self, sample: &TelemetrySample) -> ConditionCheck {
        let threshold = format!("|curvature| < {:.3}", self.config.max_curvature);
        match sample.curvature {
            Some(c) if c.abs() < self.config.max_curvature => {
                ConditionCheck::ok("curvature", threshold, format!("{:.4}", c))
            }
            Some(c) => ConditionCheck::fail(
                "curvature",
                threshold,
                format!("curve too tight ({:.4})", c),
            ),
            None => ConditionCheck::missing("curvature", threshold),
        }
    }

    /// Conditions specific to the destination side: lane line confidence,
    /// lane width, blind spot, adjacent-lane traffic.
    fn side_battery(&self, sample: &TelemetrySample, side: Direction) -> Vec<ConditionCheck> {
        let side_name = side.as_str();
        let (lane_prob, lane_width, blindspot, side_lead) = match side {
            Direction::Right => (
                sample.lane_prob_right,
                sample.lane_width_right_m,
                sample.blindspot_right,
                sample.side_lead_right,
            ),
            // Left both for Left and as the None fallback
            _ => (
                sample.lane_prob_left,
                sample.lane_width_left_m,
                sample.blindspot_left,
                sample.side_lead_left,
            ),
        };

        let mut checks = Vec::with_capacity(4);

        let threshold = format!(">= {:.2}", self.config.min_lane_prob);
        checks.push(match lane_prob {
            Some(p) if p >= self.config.min_lane_prob => ConditionCheck::ok(
                "lane_line",
                threshold,
                format!("{} lane line prob {:.2}", side_name, p),
            ),
            Some(p) => ConditionCheck::fail(
                "lane_line",
                threshold,
                format!("{} lane line prob {:.2} too low", side_name, p),
            ),
            None => ConditionCheck::missing("lane_line", threshold),
        });

        let threshold = format!(">= {:.1} m", self.config.min_lane_width_m);
        checks.push(match lane_width {
            Some(w) if w >= self.config.min_lane_width_m => ConditionCheck::ok(
                "lane_width",
                threshold,
                format!("{} lane {:.1} m", side_name, w),
            ),
            Some(w) => ConditionCheck::fail(
                "lane_width",
                threshold,
                format!("{} lane too narrow ({:.1} m)", side_name, w),
            ),
            None => ConditionCheck::missing("lane_width", threshold),
        });

        let threshold = "unoccupied".to_string();
        checks.push(match blindspot {
            Some(false) => ConditionCheck::ok(
                "blind_spot",
                threshold,
                format!("{} blind spot clear", side_name),
            ),
            Some(true) => ConditionCheck::fail(
                "blind_spot",
                threshold,
                format!("{} blind spot occupied", side_name),
            ),
            None => ConditionCheck::missing("blind_spot", threshold),
        });

        let threshold = format!(
            ">= {:.0} m and |rel| <= {:.0} km/h, or clear",
            self.config.min_side_lead_distance_m, self.config.max_side_relative_speed_kph
        );
        checks.push(match side_lead {
            // An empty destination lane does not block
            None => ConditionCheck::ok(
                "side_traffic",
                threshold,
                format!("{} lane clear", side_name),
            ),
            Some(v) if v.distance_m < self.config.min_side_lead_distance_m => {
                ConditionCheck::fail(
                    "side_traffic",
                    threshold,
                    format!("{} lane vehicle at {:.0} m too close", side_name, v.distance_m),
                )
            }
            Some(v)
                if v.relative_speed_kph.abs() > self.config.max_side_relative_speed_kph =>
            {
                ConditionCheck::fail(
                    "side_traffic",
                    threshold,
                    format!(
                        "{} lane closing speed {:.0} km/h too high",
                        side_name, v.relative_speed_kph
                    ),
                )
            }
            Some(v) => ConditionCheck::ok(
                "side_traffic",
                threshold,
                format!(
                    "{} lane vehicle at {:.0} m, rel {:.0} km/h",
                    side_name, v.distance_m, v.relative_speed_kph
                ),
            ),
        });

        checks
    }

    /// Estimate lane position from road-edge distances.
    ///
    /// The published lane number only changes after three consecutive
    /// identical readings, so single-sample noise cannot flip it.
    fn update_lane_estimate(&mut self, sample: &TelemetrySample) {
        let (left_edge, right_edge) = match (sample.edge_dist_left_m, sample.edge_dist_right_m) {
            (Some(l), Some(r)) if l > 0.0 && r > 0.0 => (l, r),
            _ => return,
        };

        let avg_width = match (sample.lane_width_left_m, sample.lane_width_right_m) {
            (Some(l), Some(r)) if l + r > 0.0 => (l + r) / 2.0,
            (Some(w), None) | (None, Some(w)) if w > 0.0 => w,
            _ => FALLBACK_LANE_WIDTH,
        };

        let total_road = left_edge + right_edge;
        let total = ((total_road / avg_width).round() as u32).clamp(2, 5);
        let relative = left_edge / total_road;
        let lane = (1 + (relative * (total - 1) as f32).round() as u32).clamp(1, total);

        self.lane_readings.push_back((lane, total));
        if self.lane_readings.len() > LANE_HISTORY {
            self.lane_readings.pop_front();
        }

        if self.lane_readings.len() >= LANE_STABLE_READINGS {
            let recent: Vec<_> = self
                .lane_readings
                .iter()
                .rev()
                .take(LANE_STABLE_READINGS)
                .collect();
            if recent.iter().all(|r| **r == *recent[0]) {
                let (stable_lane, stable_total) = *recent[0];
                if stable_lane != self.decision.current_lane
                    || stable_total != self.decision.total_lanes
                {
                    debug!("Lane estimate: {}/{}", stable_lane, stable_total);
                    self.decision.current_lane = stable_lane;
                    self.decision.total_lanes = stable_total;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::messages::{LeadVehicle, SideLead};
    use std::time::Duration;

    fn test_config() -> OvertakeConfig {
        OvertakeConfig {
            stable_evaluations: 1,
            ..OvertakeConfig::default()
        }
    }

    /// All-clear sample: 70 km/h, straight road, good lane lines, no traffic.
    fn clear_sample(seq: u64) -> TelemetrySample {
        TelemetrySample {
            seq,
            timestamp_us: seq * 100_000,
            v_ego_kph: Some(70.0),
            steering_angle_deg: Some(1.5),
            lead: None,
            curvature: Some(0.001),
            lane_prob_left: Some(0.9),
            lane_prob_right: Some(0.9),
            lane_width_left_m: Some(3.5),
            lane_width_right_m: Some(3.5),
            blindspot_left: Some(false),
            blindspot_right: Some(false),
            lane_change_phase: Some(LaneChangePhase::Idle),
            lane_change_direction: Some(Direction::None),
            ..Default::default()
        }
    }

    #[test]
    fn clear_conditions_allow_overtake() {
        let mut engine = OvertakeEngine::new(test_config());
        let decision = engine.evaluate(&clear_sample(1), Instant::now());

        assert!(decision.can_overtake);
        assert!(decision.blocking_reason.is_none());
        assert_eq!(decision.cooldown_remaining_ms, 0);
        // Auto mode prefers the left side
        assert_eq!(decision.last_direction, Direction::Left);
    }

    #[test]
    fn eligibility_implies_every_condition_satisfied() {
        let mut engine = OvertakeEngine::new(test_config());
        engine.evaluate(&clear_sample(1), Instant::now());

        assert!(engine.decision().can_overtake);
        assert!(engine.checks().iter().all(|c| c.satisfied));
        assert_eq!(engine.checks().len(), 10);
    }

    #[test]
    fn blindspot_blocks_with_reason() {
        let mut engine = OvertakeEngine::new(OvertakeConfig {
            mode: OvertakeMode::Left,
            stable_evaluations: 1,
            ..OvertakeConfig::default()
        });
        let mut sample = clear_sample(1);
        sample.blindspot_left = Some(true);

        let decision = engine.evaluate(&sample, Instant::now());
        assert!(!decision.can_overtake);
        let reason = decision.blocking_reason.as_deref().unwrap();
        assert!(reason.contains("blind"), "reason was: {}", reason);
    }

    #[test]
    fn auto_mode_falls_back_to_right_side() {
        let mut engine = OvertakeEngine::new(test_config());
        let mut sample = clear_sample(1);
        sample.blindspot_left = Some(true);

        let decision = engine.evaluate(&sample, Instant::now());
        assert!(decision.can_overtake);
        assert_eq!(decision.last_direction, Direction::Right);
    }

    #[test]
    fn lead_within_thresholds_passes() {
        let mut engine = OvertakeEngine::new(test_config());
        let mut sample = clear_sample(1);
        sample.lead = Some(LeadVehicle {
            distance_m: 40.0,
            speed_kph: 55.0,
            prob: 0.9,
        });

        let decision = engine.evaluate(&sample, Instant::now());
        assert!(decision.can_overtake);
        let presence = engine.checks().iter().find(|c| c.name == "lead_presence").unwrap();
        let speed = engine.checks().iter().find(|c| c.name == "lead_speed").unwrap();
        assert!(presence.satisfied);
        assert!(speed.satisfied);
    }

    #[test]
    fn low_probability_lead_blocks_but_absence_does_not() {
        let mut engine = OvertakeEngine::new(test_config());

        let mut sample = clear_sample(1);
        sample.lead = Some(LeadVehicle {
            distance_m: 40.0,
            speed_kph: 55.0,
            prob: 0.2,
        });
        assert!(!engine.evaluate(&sample, Instant::now()).can_overtake);

        sample.lead = None;
        assert!(engine.evaluate(&sample, Instant::now()).can_overtake);
    }

    #[test]
    fn slow_lead_blocks_as_congestion() {
        let mut engine = OvertakeEngine::new(test_config());
        let mut sample = clear_sample(1);
        sample.lead = Some(LeadVehicle {
            distance_m: 40.0,
            speed_kph: 10.0,
            prob: 0.9,
        });

        let decision = engine.evaluate(&sample, Instant::now());
        assert!(!decision.can_overtake);
        assert!(decision
            .blocking_reason
            .as_deref()
            .unwrap()
            .contains("congestion"));
    }

    #[test]
    fn missing_steering_angle_fails_closed() {
        let mut engine = OvertakeEngine::new(test_config());
        let mut sample = clear_sample(1);
        sample.steering_angle_deg = None;

        let decision = engine.evaluate(&sample, Instant::now());
        assert!(!decision.can_overtake);

        let steering = engine
            .checks()
            .iter()
            .find(|c| c.name == "steering_angle")
            .unwrap();
        assert!(!steering.satisfied);
        assert!(!steering.has_data);
    }

    #[test]
    fn disabled_mode_blocks_regardless_of_conditions() {
        let mut engine = OvertakeEngine::new(OvertakeConfig {
            mode: OvertakeMode::Disabled,
            stable_evaluations: 1,
            ..OvertakeConfig::default()
        });

        let decision = engine.evaluate(&clear_sample(1), Instant::now());
        assert!(!decision.can_overtake);
        assert!(decision
            .blocking_reason
            .as_deref()
            .unwrap()
            .contains("disabled"));
        // The battery is still computed for the diagnostics table
        assert_eq!(engine.checks().len(), 10);
    }

    #[test]
    fn cooldown_blocks_and_counts_down_by_wall_clock() {
        let mut engine = OvertakeEngine::new(test_config());
        let t0 = Instant::now();
        engine.evaluate(&clear_sample(1), t0);
        assert!(engine.decision().can_overtake);

        engine.on_maneuver_report(&ManeuverReport {
            direction: Direction::Left,
            outcome: ManeuverOutcome::Aborted,
        });
        assert_eq!(engine.decision().cooldown_remaining_ms, 3000);

        // 1s later: still blocked, counted down by the elapsed time
        let d1 = engine.evaluate(&clear_sample(2), t0 + Duration::from_millis(1000));
        assert!(!d1.can_overtake);
        assert_eq!(d1.cooldown_remaining_ms, 2000);
        assert!(d1.blocking_reason.as_deref().unwrap().contains("cooldown"));

        // Irregular sample arrival: a 5s gap clears the rest, never negative
        let d2 = engine.evaluate(&clear_sample(3), t0 + Duration::from_millis(6000));
        assert_eq!(d2.cooldown_remaining_ms, 0);
        assert!(d2.can_overtake);
    }

    #[test]
    fn can_overtake_never_true_during_cooldown() {
        let mut engine = OvertakeEngine::new(test_config());
        let t0 = Instant::now();
        engine.evaluate(&clear_sample(1), t0);
        engine.on_maneuver_report(&ManeuverReport {
            direction: Direction::Left,
            outcome: ManeuverOutcome::Completed,
        });

        let mut at = t0;
        for seq in 2..20 {
            at += Duration::from_millis(500);
            let decision = engine.evaluate(&clear_sample(seq), at);
            if decision.can_overtake {
                assert_eq!(decision.cooldown_remaining_ms, 0);
            }
        }
    }

    #[test]
    fn debounce_requires_consecutive_passing_evaluations() {
        let mut engine = OvertakeEngine::new(OvertakeConfig {
            stable_evaluations: 2,
            ..OvertakeConfig::default()
        });
        let t0 = Instant::now();

        let first = engine.evaluate(&clear_sample(1), t0);
        assert!(!first.can_overtake);
        assert!(first
            .blocking_reason
            .as_deref()
            .unwrap()
            .contains("holding"));

        let second = engine.evaluate(&clear_sample(2), t0 + Duration::from_millis(100));
        assert!(second.can_overtake);
    }

    #[test]
    fn single_failing_sample_resets_the_debounce() {
        let mut engine = OvertakeEngine::new(OvertakeConfig {
            stable_evaluations: 2,
            ..OvertakeConfig::default()
        });
        let t0 = Instant::now();

        engine.evaluate(&clear_sample(1), t0);

        let mut noisy = clear_sample(2);
        noisy.steering_angle_deg = Some(25.0);
        assert!(!engine
            .evaluate(&noisy, t0 + Duration::from_millis(100))
            .can_overtake);

        // One passing sample is not enough again after the reset
        assert!(!engine
            .evaluate(&clear_sample(3), t0 + Duration::from_millis(200))
            .can_overtake);
        assert!(engine
            .evaluate(&clear_sample(4), t0 + Duration::from_millis(300))
            .can_overtake);
    }

    #[test]
    fn duplicate_and_out_of_order_samples_do_not_crash() {
        let mut engine = OvertakeEngine::new(test_config());
        let t0 = Instant::now();
        engine.evaluate(&clear_sample(5), t0);
        engine.evaluate(&clear_sample(5), t0 + Duration::from_millis(50));
        let decision = engine.evaluate(&clear_sample(3), t0 + Duration::from_millis(100));
        assert!(decision.can_overtake);
    }

    #[test]
    fn lane_estimate_stabilizes_over_three_readings() {
        let mut engine = OvertakeEngine::new(test_config());
        let t0 = Instant::now();

        // Second lane from the left on a three-lane road:
        // edges 4.8 m left, 4.8 m right, 3.2 m lanes
        let mut sample = clear_sample(1);
        sample.edge_dist_left_m = Some(4.8);
        sample.edge_dist_right_m = Some(4.8);
        sample.lane_width_left_m = Some(3.2);
        sample.lane_width_right_m = Some(3.2);

        engine.evaluate(&sample, t0);
        assert_eq!(engine.decision().current_lane, 0);

        engine.evaluate(&sample, t0 + Duration::from_millis(100));
        engine.evaluate(&sample, t0 + Duration::from_millis(200));
        assert_eq!(engine.decision().current_lane, 2);
        assert_eq!(engine.decision().total_lanes, 3);
    }

    #[test]
    fn checks_are_rebuilt_every_call() {
        let mut engine = OvertakeEngine::new(test_config());
        let t0 = Instant::now();

        engine.evaluate(&clear_sample(1), t0);
        assert!(engine.checks().iter().all(|c| c.satisfied));

        let mut sample = clear_sample(2);
        sample.curvature = Some(0.08);
        engine.evaluate(&sample, t0 + Duration::from_millis(100));
        let curvature = engine.checks().iter().find(|c| c.name == "curvature").unwrap();
        assert!(!curvature.satisfied);
    }

    #[test]
    fn condition_order_is_fixed() {
        let mut engine = OvertakeEngine::new(test_config());
        engine.evaluate(&clear_sample(1), Instant::now());
        let names: Vec<_> = engine.checks().iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                "ego_speed",
                "steering_angle",
                "lane_change",
                "lead_presence",
                "lead_speed",
                "curvature",
                "lane_line",
                "lane_width",
                "blind_spot",
                "side_traffic",
            ]
        );
    }

    #[test]
    fn first_failing_condition_names_the_reason() {
        let mut engine = OvertakeEngine::new(test_config());
        let mut sample = clear_sample(1);
        // Both ego speed and blind spot fail; ego speed comes first
        sample.v_ego_kph = Some(30.0);
        sample.blindspot_left = Some(true);
        sample.blindspot_right = Some(true);

        let decision = engine.evaluate(&sample, Instant::now());
        assert!(decision
            .blocking_reason
            .as_deref()
            .unwrap()
            .starts_with("ego_speed"));
    }

    #[test]
    fn side_traffic_too_close_blocks() {
        let mut engine = OvertakeEngine::new(OvertakeConfig {
            mode: OvertakeMode::Left,
            stable_evaluations: 1,
            ..OvertakeConfig::default()
        });
        let mut sample = clear_sample(1);
        sample.side_lead_left = Some(SideLead {
            distance_m: 10.0,
            relative_speed_kph: 0.0,
        });

        let decision = engine.evaluate(&sample, Instant::now());
        assert!(!decision.can_overtake);
        assert!(decision
            .blocking_reason
            .as_deref()
            .unwrap()
            .contains("side_traffic"));
    }
}
