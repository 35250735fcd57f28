//! Sarathi - companion link for an in-vehicle driving-assistance unit.
//!
//! This library provides the core components for discovering the unit on
//! the local network, maintaining a telemetry link to it, mirroring
//! navigation state back, and deciding in real time whether an automated
//! overtake maneuver is currently safe.
//!
//! ## Architecture
//!
//! - **Discovery** listens for the unit's UDP announces and debounces them
//! - **Link** owns the single TCP telemetry connection and its explicit
//!   reconnect state machine
//! - **Sync** mirrors navigation state outbound on a fixed cadence and
//!   issues edge-triggered one-shot requests
//! - **Decision** evaluates every telemetry sample against an ordered
//!   battery of safety conditions with debounce and cooldown

pub mod config;
pub mod decision;
pub mod discovery;
pub mod error;
pub mod link;
pub mod shared;
pub mod sync;
pub mod threads;

// Re-export commonly used types
pub use config::SarathiConfig;
pub use error::{Result, SarathiError};
pub use shared::SharedState;
