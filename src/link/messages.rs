//! Message types exchanged with the in-vehicle unit.
//!
//! Three traffic classes share one wire vocabulary:
//! - Telemetry frames (device → app): vehicle dynamics at 10-20 Hz
//! - State frames (app → device): mirrored navigation state at ~5 Hz
//! - One-shot requests (app → device): infrequent, idempotent exchanges

use serde::{Deserialize, Serialize};

/// Top-level frame received on the telemetry stream
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum DeviceFrame {
    /// One snapshot of vehicle dynamics
    Sample(TelemetrySample),
    /// Coarse device status used for edge-triggered synchronization
    Status(DeviceStatus),
    /// Outcome of a lane-change maneuver executed by the device
    ManeuverReport(ManeuverReport),
}

/// Lateral direction as reported or commanded
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    None,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::None => "none",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// Phase of a lane-change maneuver on the device
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneChangePhase {
    Idle,
    Preparing,
    Changing,
    Finishing,
}

/// Nearest detected vehicle ahead in a lane
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct LeadVehicle {
    /// Relative distance (m)
    pub distance_m: f32,
    /// Absolute speed (km/h)
    pub speed_kph: f32,
    /// Existence probability (0..=1)
    pub prob: f32,
}

/// Vehicle observed in an adjacent lane
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct SideLead {
    /// Relative distance (m)
    pub distance_m: f32,
    /// Relative speed, positive when the other vehicle is faster (km/h)
    pub relative_speed_kph: f32,
}

/// One immutable snapshot of vehicle dynamics.
///
/// Every field the device cannot currently measure is `None`; the decision
/// engine treats missing data as failing the affected condition, with lead
/// absence as the only exception.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TelemetrySample {
    /// Monotonically increasing sequence number (ordering diagnostics only)
    pub seq: u64,
    /// Device clock timestamp in microseconds
    pub timestamp_us: u64,

    pub v_ego_kph: Option<f32>,
    pub steering_angle_deg: Option<f32>,
    pub lead: Option<LeadVehicle>,
    /// Signed road curvature estimate (1/m)
    pub curvature: Option<f32>,

    pub lane_prob_left: Option<f32>,
    pub lane_prob_right: Option<f32>,
    pub lane_width_left_m: Option<f32>,
    pub lane_width_right_m: Option<f32>,
    pub blindspot_left: Option<bool>,
    pub blindspot_right: Option<bool>,

    pub lane_change_phase: Option<LaneChangePhase>,
    pub lane_change_direction: Option<Direction>,

    /// Distance to the road edge on each side (m), for lane estimation
    pub edge_dist_left_m: Option<f32>,
    pub edge_dist_right_m: Option<f32>,

    pub side_lead_left: Option<SideLead>,
    pub side_lead_right: Option<SideLead>,
}

/// Coarse device status, also present in discovery announces
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceStatus {
    /// A route has been confirmed on the device
    pub route_active: bool,
    /// Longitudinal/lateral automation is engaged
    pub automation_active: bool,
    #[serde(default)]
    pub onroad: Option<bool>,
    #[serde(default)]
    pub cruise_engaged: Option<bool>,
}

/// How a maneuver ended
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManeuverOutcome {
    Completed,
    Aborted,
}

/// Device report that a lane-change maneuver finished
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ManeuverReport {
    pub direction: Direction,
    pub outcome: ManeuverOutcome,
}

/// WGS-84 coordinates
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// (0, 0) marks "no destination set"
    pub fn is_zero(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// Top-level frame sent to the device outside the request channel
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum OutboundFrame {
    /// Periodic mirror of locally known navigation/vehicle state
    State(OutboundStateFrame),
    /// User-triggered command, sent immediately
    Command(DeviceCommand),
}

/// Periodic state mirror, rebuilt from scratch every send cycle
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OutboundStateFrame {
    pub seq: u64,
    pub road_speed_limit_kph: Option<u16>,
    /// Distance to the active speed limit (m); values under 100 m are
    /// reported with a fixed 30 m lead and may go negative near the point
    pub speed_limit_distance_m: Option<f32>,
    pub destination: Option<GeoPoint>,
    pub destination_name: Option<String>,
    pub route_active: bool,
    pub automation_active: bool,
    /// Current overtake eligibility, for the device's own control policy
    pub overtake_allowed: bool,
    pub overtake_direction: Direction,
}

/// User-triggered device commands
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    SetCruiseSpeed { kph: u16 },
    LaneChange { direction: Direction },
    CancelManeuver,
}

/// One-shot request sent over the short-lived request channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum OneShotRequest {
    ConfirmDestination {
        point: GeoPoint,
        name: Option<String>,
    },
    SetMode {
        mode: String,
    },
}

/// Reply to a one-shot request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OneShotReply {
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Discovery announce broadcast by the device (~10 Hz).
///
/// Unknown fields are ignored so firmware revisions can extend the payload.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DeviceAnnounce {
    pub ip: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub route_active: Option<bool>,
    #[serde(default)]
    pub automation_active: Option<bool>,
}
