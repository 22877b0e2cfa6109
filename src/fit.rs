//! FIT file ingestion.
//!
//! Decodes the `record` messages of a Garmin FIT activity into [`RawSample`]s.
//! Positions are stored as semicircles and converted to degrees. When a
//! record carries both, `enhanced_altitude` wins over `altitude` and
//! `enhanced_speed` over `speed`.

use std::path::Path;

use chrono::{DateTime, Utc};
use fitparser::profile::MesgNum;
use fitparser::Value;
use log::{debug, info, warn};

use crate::error::{AnimatorError, Result};
use crate::source::SampleSource;
use crate::RawSample;

/// Degrees per semicircle (180 / 2^31).
const SEMICIRCLE_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

/// A FIT activity held in memory, decoded on read.
#[derive(Debug, Clone)]
pub struct FitFileSource {
    bytes: Vec<u8>,
}

impl FitFileSource {
    /// Load a FIT file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| AnimatorError::Decode {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        debug!("[Fit] Loaded {} bytes from {}", bytes.len(), path.display());
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl SampleSource for FitFileSource {
    fn read_samples(&mut self) -> Result<Vec<RawSample>> {
        decode_fit(&self.bytes)
    }
}

/// Decode every `record` message in `bytes`.
///
/// Records without a timestamp cannot be placed on the timeline and are
/// skipped.
pub fn decode_fit(bytes: &[u8]) -> Result<Vec<RawSample>> {
    let records = fitparser::from_bytes(bytes).map_err(|e| AnimatorError::Decode {
        message: format!("FIT parse error: {}", e),
    })?;

    let mut samples = Vec::new();
    let mut untimed = 0usize;
    for record in records {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut fields = RecordFields::default();
        for field in record.fields() {
            fields.apply(field.name(), field.value());
        }
        match fields.into_sample() {
            Some(sample) => samples.push(sample),
            None => untimed += 1,
        }
    }

    if untimed > 0 {
        warn!("[Fit] Skipped {} records without a timestamp", untimed);
    }
    info!("[Fit] Decoded {} record samples", samples.len());
    Ok(samples)
}

/// Field values collected from one `record` message.
#[derive(Debug, Default)]
struct RecordFields {
    timestamp: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lon: Option<f64>,
    altitude: Option<f64>,
    enhanced_altitude: Option<f64>,
    speed: Option<f64>,
    enhanced_speed: Option<f64>,
    heart_rate: Option<u16>,
    cadence: Option<u16>,
}

impl RecordFields {
    fn apply(&mut self, name: &str, value: &Value) {
        match name {
            "timestamp" => {
                if let Value::Timestamp(t) = value {
                    self.timestamp = Some(t.with_timezone(&Utc));
                }
            }
            "position_lat" => self.lat = value_to_f64(value).map(|v| v * SEMICIRCLE_TO_DEGREES),
            "position_long" => self.lon = value_to_f64(value).map(|v| v * SEMICIRCLE_TO_DEGREES),
            "altitude" => self.altitude = value_to_f64(value),
            "enhanced_altitude" => self.enhanced_altitude = value_to_f64(value),
            "speed" => self.speed = value_to_f64(value),
            "enhanced_speed" => self.enhanced_speed = value_to_f64(value),
            "heart_rate" => self.heart_rate = value_to_u16(value),
            "cadence" => self.cadence = value_to_u16(value),
            _ => {}
        }
    }

    fn into_sample(self) -> Option<RawSample> {
        let timestamp = self.timestamp?;
        Some(RawSample {
            timestamp,
            latitude: self.lat,
            longitude: self.lon,
            elevation: self.enhanced_altitude.or(self.altitude),
            speed: self.enhanced_speed.or(self.speed),
            heart_rate: self.heart_rate,
            cadence: self.cadence,
        })
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        Value::SInt8(v) => Some(*v as f64),
        Value::UInt8(v) => Some(*v as f64),
        Value::SInt16(v) => Some(*v as f64),
        Value::UInt16(v) => Some(*v as f64),
        Value::SInt32(v) => Some(*v as f64),
        Value::UInt32(v) => Some(*v as f64),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt64(v) => Some(*v as f64),
        Value::Array(values) => values.iter().find_map(value_to_f64),
        _ => None,
    }
}

fn value_to_u16(value: &Value) -> Option<u16> {
    match value {
        Value::UInt8(v) => Some(*v as u16),
        Value::UInt16(v) => Some(*v),
        other => value_to_f64(other)
            .filter(|v| v.is_finite() && *v >= 0.0 && *v <= u16::MAX as f64)
            .map(|v| v.round() as u16),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn timestamp() -> Value {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Value::Timestamp(t.with_timezone(&Local))
    }

    #[test]
    fn test_empty_input_is_decode_error() {
        assert!(matches!(decode_fit(&[]), Err(AnimatorError::Decode { .. })));
        let mut source = FitFileSource::from_bytes(vec![0, 1, 2, 3]);
        assert!(source.read_samples().is_err());
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let result = FitFileSource::open("/nonexistent/ride.fit");
        assert!(matches!(result, Err(AnimatorError::Decode { .. })));
    }

    #[test]
    fn test_semicircles_to_degrees() {
        let mut fields = RecordFields::default();
        fields.apply("timestamp", &timestamp());
        fields.apply("position_lat", &Value::SInt32(1 << 30));
        fields.apply("position_long", &Value::SInt32(-(1 << 29)));
        let sample = fields.into_sample().unwrap();
        assert_eq!(sample.latitude, Some(90.0));
        assert_eq!(sample.longitude, Some(-45.0));
    }

    #[test]
    fn test_enhanced_fields_preferred() {
        let mut fields = RecordFields::default();
        fields.apply("timestamp", &timestamp());
        fields.apply("enhanced_altitude", &Value::Float64(123.4));
        fields.apply("altitude", &Value::Float64(120.0));
        fields.apply("speed", &Value::Float64(5.0));
        fields.apply("enhanced_speed", &Value::Float64(5.2));
        fields.apply("heart_rate", &Value::UInt8(151));
        fields.apply("cadence", &Value::UInt8(88));
        let sample = fields.into_sample().unwrap();
        assert_eq!(sample.elevation, Some(123.4));
        assert_eq!(sample.speed, Some(5.2));
        assert_eq!(sample.heart_rate, Some(151));
        assert_eq!(sample.cadence, Some(88));
    }

    #[test]
    fn test_plain_altitude_used_when_alone() {
        let mut fields = RecordFields::default();
        fields.apply("timestamp", &timestamp());
        fields.apply("altitude", &Value::Float64(42.0));
        let sample = fields.into_sample().unwrap();
        assert_eq!(sample.elevation, Some(42.0));
        assert_eq!(sample.speed, None);
    }

    #[test]
    fn test_record_without_timestamp_is_skipped() {
        let mut fields = RecordFields::default();
        fields.apply("altitude", &Value::Float64(42.0));
        assert!(fields.into_sample().is_none());
    }
}
