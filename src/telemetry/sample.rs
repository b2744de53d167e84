//! # Telemetry Samples
//!
//! Observations produced outside the uplink (location fix + cellular signal).

use serde::{Deserialize, Serialize};

/// Signal level reported when the modem could not provide a reading
pub const SIGNAL_UNKNOWN: i32 = -120;

/// A location fix attached to a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f32,
    /// Ground speed in m/s, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// One telemetry observation
///
/// Immutable once produced. The uplink never re-validates a sample; the
/// producer decides eligibility with [`TelemetrySample::is_reportable`] (or
/// its own predicate) before calling `submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Capture time, epoch milliseconds
    pub timestamp_millis: i64,
    /// Signal strength (dBm or bucketed level); [`SIGNAL_UNKNOWN`] if absent
    pub signal_level: i32,
    #[serde(default)]
    pub location: Option<GeoFix>,
    pub device_model: String,
    pub platform_version: u32,
}

impl TelemetrySample {
    /// Producer-side validity predicate
    ///
    /// A sample is worth reporting when the signal is known and the location
    /// fix is more accurate than `max_accuracy_m`.
    pub fn is_reportable(&self, max_accuracy_m: f32) -> bool {
        let signal_ok = self.signal_level != SIGNAL_UNKNOWN;
        let location_ok = self
            .location
            .map(|fix| fix.accuracy < max_accuracy_m)
            .unwrap_or(false);
        signal_ok && location_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(signal: i32, accuracy: Option<f32>) -> TelemetrySample {
        TelemetrySample {
            timestamp_millis: 1_700_000_000_000,
            signal_level: signal,
            location: accuracy.map(|accuracy| GeoFix {
                latitude: 55.75,
                longitude: 37.61,
                accuracy,
                speed: None,
            }),
            device_model: "Pixel 7".to_string(),
            platform_version: 34,
        }
    }

    #[test]
    fn test_reportable_with_signal_and_accurate_fix() {
        assert!(sample(-95, Some(12.0)).is_reportable(100.0));
    }

    #[test]
    fn test_unknown_signal_not_reportable() {
        assert!(!sample(SIGNAL_UNKNOWN, Some(12.0)).is_reportable(100.0));
    }

    #[test]
    fn test_missing_fix_not_reportable() {
        assert!(!sample(-95, None).is_reportable(100.0));
    }

    #[test]
    fn test_accuracy_threshold_is_exclusive() {
        assert!(!sample(-95, Some(100.0)).is_reportable(100.0));
        assert!(sample(-95, Some(99.9)).is_reportable(100.0));
    }

    #[test]
    fn test_deserialize_without_location() {
        let json = r#"{"timestamp_millis":1,"signal_level":-80,"device_model":"X","platform_version":30}"#;
        let parsed: TelemetrySample = serde_json::from_str(json).unwrap();
        assert!(parsed.location.is_none());
    }
}
