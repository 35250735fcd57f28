//! Configuration loading for Sarathi
//!
//! Thresholds that gate the overtake decision are validated at load time:
//! out-of-range values are clamped back to their defaults with a warning so
//! a bad config file can never inject an unsafe threshold into the
//! per-sample evaluation path.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Main configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct SarathiConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub overtake: OvertakeConfig,
}

/// Network connection settings for the in-vehicle unit
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Device IP address; empty means "wait for discovery"
    #[serde(default)]
    pub device_ip: String,

    /// TCP port of the device telemetry stream (default: 7706)
    #[serde(default = "default_telemetry_port")]
    pub telemetry_port: u16,

    /// TCP port of the one-shot request channel (default: 7709)
    #[serde(default = "default_request_port")]
    pub request_port: u16,

    /// Connect timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Socket read timeout in milliseconds (default: 500)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Delay between reconnect attempts in milliseconds (default: 2000,
    /// valid range 1000..=3000)
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,

    /// Stream silence after which the device endpoint counts as stale and
    /// the connection is recycled (default: 3000)
    #[serde(default = "default_silence_window")]
    pub silence_window_ms: u64,

    /// Wire format: "json" or "postcard"
    #[serde(default = "default_wire_format")]
    pub wire_format: String,
}

/// Discovery listener settings
#[derive(Clone, Debug, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port the device announces itself on (default: 7705)
    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Suppression window for repeated announces of the same IP (default: 3000)
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

/// Outbound state synchronization settings
#[derive(Clone, Debug, Deserialize)]
pub struct SyncConfig {
    /// Periodic send interval in milliseconds (default: 200, valid 150..=250)
    #[serde(default = "default_sync_interval")]
    pub interval_ms: u64,

    /// Minimum spacing between manual command sends (default: 500)
    #[serde(default = "default_manual_spacing")]
    pub min_manual_spacing_ms: u64,

    /// Timeout for one-shot request round trips (default: 2000)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Overtake eligibility thresholds
#[derive(Clone, Debug, Deserialize)]
pub struct OvertakeConfig {
    /// Overtake mode: "disabled", "left", "right" or "auto"
    #[serde(default = "default_mode")]
    pub mode: OvertakeMode,

    /// Minimum ego speed for any overtake (km/h)
    #[serde(default = "default_min_overtake_speed")]
    pub min_overtake_speed_kph: f32,

    /// Maximum absolute steering angle (degrees)
    #[serde(default = "default_max_steering_angle")]
    pub max_steering_angle_deg: f32,

    /// Maximum lead tracking distance (m)
    #[serde(default = "default_max_lead_distance")]
    pub max_lead_distance_m: f32,

    /// Minimum lead existence probability (0..=1)
    #[serde(default = "default_min_lead_prob")]
    pub min_lead_prob: f32,

    /// Minimum lead speed; slower leads usually mean congestion (km/h)
    #[serde(default = "default_min_lead_speed")]
    pub min_lead_speed_kph: f32,

    /// Minimum ego-minus-lead speed differential (km/h)
    #[serde(default = "default_min_speed_advantage")]
    pub min_speed_advantage_kph: f32,

    /// Maximum absolute road curvature (1/m)
    #[serde(default = "default_max_curvature")]
    pub max_curvature: f32,

    /// Minimum lane-line confidence on the destination side (0..=1)
    #[serde(default = "default_min_lane_prob")]
    pub min_lane_prob: f32,

    /// Minimum lane width on the destination side (m)
    #[serde(default = "default_min_lane_width")]
    pub min_lane_width_m: f32,

    /// Minimum distance to a vehicle in the destination lane (m)
    #[serde(default = "default_min_side_lead_distance")]
    pub min_side_lead_distance_m: f32,

    /// Maximum absolute relative speed of a destination-lane vehicle (km/h)
    #[serde(default = "default_max_side_relative_speed")]
    pub max_side_relative_speed_kph: f32,

    /// Cooldown after a completed maneuver (ms)
    #[serde(default = "default_cooldown_completed")]
    pub cooldown_completed_ms: u64,

    /// Cooldown after an aborted maneuver (ms)
    #[serde(default = "default_cooldown_aborted")]
    pub cooldown_aborted_ms: u64,

    /// Consecutive evaluations the full condition set must hold before
    /// eligibility flips true (>= 1)
    #[serde(default = "default_stable_evaluations")]
    pub stable_evaluations: u32,

    /// Assumed lane count when road-edge data is unavailable
    #[serde(default = "default_total_lanes")]
    pub default_total_lanes: u32,
}

/// Overtake mode selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OvertakeMode {
    Disabled,
    Left,
    Right,
    Auto,
}

// Default value functions
fn default_telemetry_port() -> u16 {
    7706
}
fn default_request_port() -> u16 {
    7709
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_read_timeout() -> u64 {
    500
}
fn default_reconnect_backoff() -> u64 {
    2000
}
fn default_silence_window() -> u64 {
    3000
}
fn default_wire_format() -> String {
    "json".to_string()
}
fn default_discovery_port() -> u16 {
    7705
}
fn default_debounce() -> u64 {
    3000
}
fn default_sync_interval() -> u64 {
    200
}
fn default_manual_spacing() -> u64 {
    500
}
fn default_request_timeout() -> u64 {
    2000
}
fn default_mode() -> OvertakeMode {
    OvertakeMode::Auto
}
fn default_min_overtake_speed() -> f32 {
    60.0
}
fn default_max_steering_angle() -> f32 {
    10.0
}
fn default_max_lead_distance() -> f32 {
    100.0
}
fn default_min_lead_prob() -> f32 {
    0.5
}
fn default_min_lead_speed() -> f32 {
    20.0
}
fn default_min_speed_advantage() -> f32 {
    10.0
}
fn default_max_curvature() -> f32 {
    0.02
}
fn default_min_lane_prob() -> f32 {
    0.6
}
fn default_min_lane_width() -> f32 {
    2.8
}
fn default_min_side_lead_distance() -> f32 {
    25.0
}
fn default_max_side_relative_speed() -> f32 {
    25.0
}
fn default_cooldown_completed() -> u64 {
    15000
}
fn default_cooldown_aborted() -> u64 {
    3000
}
fn default_stable_evaluations() -> u32 {
    2
}
fn default_total_lanes() -> u32 {
    3
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_ip: String::new(),
            telemetry_port: default_telemetry_port(),
            request_port: default_request_port(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            silence_window_ms: default_silence_window(),
            wire_format: default_wire_format(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            debounce_ms: default_debounce(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval(),
            min_manual_spacing_ms: default_manual_spacing(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for OvertakeConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            min_overtake_speed_kph: default_min_overtake_speed(),
            max_steering_angle_deg: default_max_steering_angle(),
            max_lead_distance_m: default_max_lead_distance(),
            min_lead_prob: default_min_lead_prob(),
            min_lead_speed_kph: default_min_lead_speed(),
            min_speed_advantage_kph: default_min_speed_advantage(),
            max_curvature: default_max_curvature(),
            min_lane_prob: default_min_lane_prob(),
            min_lane_width_m: default_min_lane_width(),
            min_side_lead_distance_m: default_min_side_lead_distance(),
            max_side_relative_speed_kph: default_max_side_relative_speed(),
            cooldown_completed_ms: default_cooldown_completed(),
            cooldown_aborted_ms: default_cooldown_aborted(),
            stable_evaluations: default_stable_evaluations(),
            default_total_lanes: default_total_lanes(),
        }
    }
}

impl Default for SarathiConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            discovery: DiscoveryConfig::default(),
            sync: SyncConfig::default(),
            overtake: OvertakeConfig::default(),
        }
    }
}

impl SarathiConfig {
    /// Load configuration from a TOML file and clamp invalid values
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::SarathiError::Config(format!("Failed to read config file: {}", e))
        })?;
        let mut config: SarathiConfig = toml::from_str(&content)?;
        config.sanitize();
        Ok(config)
    }

    /// Clamp out-of-range values back to safe defaults
    pub fn sanitize(&mut self) {
        let c = &mut self.connection;
        if !(1000..=3000).contains(&c.reconnect_backoff_ms) {
            warn!(
                "reconnect_backoff_ms {} out of range, using {}",
                c.reconnect_backoff_ms,
                default_reconnect_backoff()
            );
            c.reconnect_backoff_ms = default_reconnect_backoff();
        }
        if c.connect_timeout_ms == 0 {
            c.connect_timeout_ms = default_connect_timeout();
        }
        if c.read_timeout_ms == 0 {
            c.read_timeout_ms = default_read_timeout();
        }
        if c.silence_window_ms == 0 {
            c.silence_window_ms = default_silence_window();
        }

        let s = &mut self.sync;
        if !(150..=250).contains(&s.interval_ms) {
            warn!(
                "sync interval_ms {} out of range, using {}",
                s.interval_ms,
                default_sync_interval()
            );
            s.interval_ms = default_sync_interval();
        }
        if s.min_manual_spacing_ms == 0 {
            s.min_manual_spacing_ms = default_manual_spacing();
        }

        let o = &mut self.overtake;
        clamp_positive(&mut o.min_overtake_speed_kph, default_min_overtake_speed(), "min_overtake_speed_kph");
        clamp_positive(&mut o.max_steering_angle_deg, default_max_steering_angle(), "max_steering_angle_deg");
        clamp_positive(&mut o.max_lead_distance_m, default_max_lead_distance(), "max_lead_distance_m");
        clamp_unit(&mut o.min_lead_prob, default_min_lead_prob(), "min_lead_prob");
        clamp_positive(&mut o.min_lead_speed_kph, default_min_lead_speed(), "min_lead_speed_kph");
        clamp_positive(&mut o.min_speed_advantage_kph, default_min_speed_advantage(), "min_speed_advantage_kph");
        clamp_positive(&mut o.max_curvature, default_max_curvature(), "max_curvature");
        clamp_unit(&mut o.min_lane_prob, default_min_lane_prob(), "min_lane_prob");
        clamp_positive(&mut o.min_lane_width_m, default_min_lane_width(), "min_lane_width_m");
        clamp_positive(&mut o.min_side_lead_distance_m, default_min_side_lead_distance(), "min_side_lead_distance_m");
        clamp_positive(&mut o.max_side_relative_speed_kph, default_max_side_relative_speed(), "max_side_relative_speed_kph");
        if o.stable_evaluations == 0 {
            warn!("stable_evaluations must be >= 1, using {}", default_stable_evaluations());
            o.stable_evaluations = default_stable_evaluations();
        }
        if !(2..=5).contains(&o.default_total_lanes) {
            warn!("default_total_lanes {} out of range, using {}", o.default_total_lanes, default_total_lanes());
            o.default_total_lanes = default_total_lanes();
        }
    }

    /// Telemetry stream address for a given device IP
    pub fn telemetry_address(&self, ip: &str) -> String {
        format!("{}:{}", ip, self.connection.telemetry_port)
    }

    /// One-shot request address for a given device IP
    pub fn request_address(&self, ip: &str) -> String {
        format!("{}:{}", ip, self.connection.request_port)
    }
}

fn clamp_positive(value: &mut f32, default: f32, name: &str) {
    if !value.is_finite() || *value <= 0.0 {
        warn!("{} {} invalid, using {}", name, value, default);
        *value = default;
    }
}

fn clamp_unit(value: &mut f32, default: f32, name: &str) {
    if !value.is_finite() || !(0.0..=1.0).contains(value) {
        warn!("{} {} out of [0, 1], using {}", name, value, default);
        *value = default;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let mut config = SarathiConfig::default();
        config.sanitize();
        assert_eq!(config.sync.interval_ms, 200);
        assert_eq!(config.overtake.mode, OvertakeMode::Auto);
        assert!(config.overtake.stable_evaluations >= 1);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut config: SarathiConfig = toml::from_str(
            r#"
            [sync]
            interval_ms = 5000

            [connection]
            reconnect_backoff_ms = 60000

            [overtake]
            min_lead_prob = 1.7
            min_overtake_speed_kph = -20.0
            stable_evaluations = 0
            "#,
        )
        .unwrap();
        config.sanitize();

        assert_eq!(config.sync.interval_ms, 200);
        assert_eq!(config.connection.reconnect_backoff_ms, 2000);
        assert_eq!(config.overtake.min_lead_prob, 0.5);
        assert_eq!(config.overtake.min_overtake_speed_kph, 60.0);
        assert_eq!(config.overtake.stable_evaluations, 2);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: SarathiConfig = toml::from_str(
            r#"
            [connection]
            device_ip = "192.168.1.40"

            [overtake]
            mode = "left"
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.device_ip, "192.168.1.40");
        assert_eq!(config.connection.telemetry_port, 7706);
        assert_eq!(config.overtake.mode, OvertakeMode::Left);
        assert_eq!(config.overtake.min_lane_width_m, 2.8);
    }

    #[test]
    fn addresses_combine_ip_and_port() {
        let config = SarathiConfig::default();
        assert_eq!(config.telemetry_address("10.0.0.2"), "10.0.0.2:7706");
        assert_eq!(config.request_address("10.0.0.2"), "10.0.0.2:7709");
    }
}
