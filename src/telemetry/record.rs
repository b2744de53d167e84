//! # Telemetry Records
//!
//! The flat object delivered to the collector. The same body is stored in
//! the offline buffer, so a buffered record is replayed byte-for-byte in
//! the shape it would have been sent live.

use serde::{Deserialize, Serialize};

use super::sample::TelemetrySample;
use crate::error::Result;

/// Wire/buffer representation of a sample
///
/// Location fields are present only when the sample carried a fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: i64,
    pub signal: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    pub device: String,
    pub android_version: u32,
    pub source: String,
}

impl TelemetryRecord {
    /// Flatten a sample, tagging it with the reporting `source`
    pub fn from_sample(sample: &TelemetrySample, source: &str) -> Self {
        let fix = sample.location;
        Self {
            timestamp: sample.timestamp_millis,
            signal: sample.signal_level,
            latitude: fix.map(|f| f.latitude),
            longitude: fix.map(|f| f.longitude),
            accuracy: fix.map(|f| f.accuracy),
            speed: fix.and_then(|f| f.speed),
            device: sample.device_model.clone(),
            android_version: sample.platform_version,
            source: source.to_string(),
        }
    }

    /// Encode as a single-line JSON text payload
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::sample::GeoFix;
    use serde_json::Value;

    fn sample_with(location: Option<GeoFix>) -> TelemetrySample {
        TelemetrySample {
            timestamp_millis: 1_700_000_123_456,
            signal_level: -97,
            location,
            device_model: "SM-A525F".to_string(),
            platform_version: 33,
        }
    }

    #[test]
    fn test_fields_with_location() {
        let record = TelemetryRecord::from_sample(
            &sample_with(Some(GeoFix {
                latitude: 59.93,
                longitude: 30.31,
                accuracy: 8.5,
                speed: Some(1.25),
            })),
            "LocationTrackingService",
        );
        let value: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();

        assert_eq!(value["timestamp"], 1_700_000_123_456i64);
        assert_eq!(value["signal"], -97);
        assert_eq!(value["latitude"], 59.93);
        assert_eq!(value["longitude"], 30.31);
        assert_eq!(value["accuracy"], 8.5);
        assert_eq!(value["speed"], 1.25);
        assert_eq!(value["device"], "SM-A525F");
        assert_eq!(value["android_version"], 33);
        assert_eq!(value["source"], "LocationTrackingService");
    }

    #[test]
    fn test_location_fields_omitted_without_fix() {
        let record = TelemetryRecord::from_sample(&sample_with(None), "svc");
        let value: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        let object = value.as_object().unwrap();

        for key in ["latitude", "longitude", "accuracy", "speed"] {
            assert!(!object.contains_key(key), "{} should be absent", key);
        }
        assert_eq!(object.len(), 5);
    }

    #[test]
    fn test_speed_omitted_when_unknown() {
        let record = TelemetryRecord::from_sample(
            &sample_with(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
                accuracy: 3.0,
                speed: None,
            })),
            "svc",
        );
        let json = record.to_json().unwrap();
        assert!(json.contains("\"accuracy\""));
        assert!(!json.contains("\"speed\""));
    }

    #[test]
    fn test_payload_is_single_line() {
        let record = TelemetryRecord::from_sample(&sample_with(None), "svc");
        assert!(!record.to_json().unwrap().contains('\n'));
    }
}
