//! # Telemetry Module
//!
//! Value types flowing through the uplink.
//!
//! This module handles:
//! - `TelemetrySample`: one observation handed over by the sensor producer
//! - `TelemetryRecord`: the flat JSON object sent on the wire and kept in the
//!   offline buffer (both use the same body)

pub mod record;
pub mod sample;

pub use record::TelemetryRecord;
pub use sample::{GeoFix, TelemetrySample, SIGNAL_UNKNOWN};
