//! # Validation and repair rules
//!
//! Stateless checks applied to a mapped record before a
//! [`TrackPoint`](crate::track_point::TrackPoint) is built. They fall in two groups:
//!
//! * **Hard rules** return a [`ValidationError`] and reject the record: required fields,
//!   timestamp parsing and range, coordinate range.
//! * **Soft rules** return `(value, flagged)` and never reject: speed and heading outside their
//!   range are nulled and flagged, a high HDOP is kept and flagged.
//!
//! Every function here is pure except [`validate_timestamp`], which reads the wall clock; its
//! deterministic core is [`validate_timestamp_at`].
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use hifitime::Epoch;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    EPOCH_MILLIS_THRESHOLD, MAX_FUTURE_SKEW_DAYS, MAX_SPEED_MPS, MAX_TRUSTED_HDOP,
};
use crate::mapping::{CanonicalField, MappedRecord};
use crate::record::RawValue;

/// Reason a record was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(CanonicalField),

    #[error("device_id cannot be empty")]
    EmptyDeviceId,

    #[error("Field {field} must be numeric, got {value}")]
    NotNumeric { field: CanonicalField, value: String },

    #[error("Latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("Longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("Timestamp {0} is before 1970-01-01")]
    TimestampBeforeEpoch(DateTime<Utc>),

    #[error("Timestamp {0} is more than 2 days in the future")]
    TimestampInFuture(DateTime<Utc>),

    #[error("Invalid epoch timestamp: {0}")]
    InvalidEpoch(f64),

    #[error("Cannot parse timestamp: {0}")]
    UnparseableTimestamp(String),

    #[error("Unsupported timestamp type: {0}")]
    UnsupportedTimestampType(&'static str),
}

/// Non-fatal marker attached to a point whose value was suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityFlag {
    #[serde(rename = "flag_speed_spike")]
    SpeedSpike,
    #[serde(rename = "flag_bad_heading")]
    BadHeading,
    #[serde(rename = "flag_bad_hdop")]
    BadHdop,
    #[serde(rename = "flag_bad_altitude")]
    BadAltitude,
}

impl QualityFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityFlag::SpeedSpike => "flag_speed_spike",
            QualityFlag::BadHeading => "flag_bad_heading",
            QualityFlag::BadHdop => "flag_bad_hdop",
            QualityFlag::BadAltitude => "flag_bad_altitude",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags raised while validating one record, serialized as `{"flag_speed_spike": true, ...}`.
pub type QualityFlags = BTreeMap<QualityFlag, bool>;

/// Check that `device_id`, `ts_utc`, `lat` and `lon` are present and that the device id is
/// not blank once trimmed.
pub fn validate_required_fields(mapped: &MappedRecord) -> Result<(), ValidationError> {
    for field in CanonicalField::REQUIRED {
        match mapped.get(field) {
            None | Some(RawValue::Null) => return Err(ValidationError::MissingField(field)),
            Some(value) if field == CanonicalField::DeviceId => {
                let blank = value.as_text().map_or(true, |s| s.trim().is_empty());
                if blank {
                    return Err(ValidationError::EmptyDeviceId);
                }
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Reject coordinates outside `[-90, 90] × [-180, 180]` (NaN is out of range).
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::LatitudeOutOfRange(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(ValidationError::LongitudeOutOfRange(lon));
    }
    Ok(())
}

/// Check `ts` lies in `[1970-01-01, now + 2 days]`.
pub fn validate_timestamp_at(ts: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if ts.timestamp() < 0 {
        return Err(ValidationError::TimestampBeforeEpoch(ts));
    }
    if ts > now + Duration::days(MAX_FUTURE_SKEW_DAYS) {
        return Err(ValidationError::TimestampInFuture(ts));
    }
    Ok(())
}

/// [`validate_timestamp_at`] against the current wall clock.
pub fn validate_timestamp(ts: DateTime<Utc>) -> Result<(), ValidationError> {
    validate_timestamp_at(ts, Utc::now())
}

/// Null and flag a speed outside `[0, 120]` m/s.
pub fn validate_speed(speed_mps: Option<f64>) -> (Option<f64>, bool) {
    match speed_mps {
        None => (None, false),
        Some(v) if (0.0..=MAX_SPEED_MPS).contains(&v) => (Some(v), false),
        Some(_) => (None, true),
    }
}

/// Null and flag a heading outside `[0, 360)` degrees.
pub fn validate_heading(heading_deg: Option<f64>) -> (Option<f64>, bool) {
    match heading_deg {
        None => (None, false),
        Some(v) if (0.0..360.0).contains(&v) => (Some(v), false),
        Some(_) => (None, true),
    }
}

/// Keep but flag an HDOP above 10; a negative HDOP is meaningless and is nulled and flagged.
pub fn validate_hdop(hdop: Option<f64>) -> (Option<f64>, bool) {
    match hdop {
        None => (None, false),
        Some(v) if v.is_nan() || v < 0.0 => (None, true),
        Some(v) if v > MAX_TRUSTED_HDOP => (Some(v), true),
        Some(v) => (Some(v), false),
    }
}

/// Altitude has no range rule; only a non-finite value is dropped and flagged.
pub fn validate_altitude(alt_m: Option<f64>) -> (Option<f64>, bool) {
    match alt_m {
        Some(v) if !v.is_finite() => (None, true),
        other => (other, false),
    }
}

/// Naive layouts tried, in order, once strict RFC 3339 parsing failed.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Zone-carrying layouts tried after the naive ones.
const ZONED_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%a, %d %b %Y %H:%M:%S %z",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Turn a raw timestamp value into a UTC instant.
///
/// Accepted inputs
/// ---------------
/// * an already-typed timestamp (returned unchanged),
/// * a numeric epoch: values above `1e10` are milliseconds, others seconds,
/// * text: strict RFC 3339 / ISO-8601 first, then a permissive set of layouts (naive values
///   are read as UTC), then numeric-text epochs, then hifitime's epoch grammar
///   (`"2024-05-01T12:00:00 UTC"`, `"MJD 60431.5 UTC"`).
///
/// Errors
/// ------
/// * [`ValidationError::InvalidEpoch`] for non-finite or unrepresentable epochs,
/// * [`ValidationError::UnparseableTimestamp`] for text nothing could parse,
/// * [`ValidationError::UnsupportedTimestampType`] for booleans, lists, maps and null.
pub fn repair_timestamp(value: &RawValue) -> Result<DateTime<Utc>, ValidationError> {
    match value {
        RawValue::Timestamp(ts) => Ok(*ts),
        RawValue::Int(i) => from_epoch(*i as f64),
        RawValue::Float(f) => from_epoch(*f),
        RawValue::Text(s) => parse_timestamp_text(s),
        other => Err(ValidationError::UnsupportedTimestampType(other.kind())),
    }
}

fn from_epoch(value: f64) -> Result<DateTime<Utc>, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidEpoch(value));
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    if millis.abs() > i64::MAX as f64 {
        return Err(ValidationError::InvalidEpoch(value));
    }
    DateTime::<Utc>::from_timestamp_millis(millis.round() as i64)
        .ok_or(ValidationError::InvalidEpoch(value))
}

fn parse_timestamp_text(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let s = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    for format in ZONED_DATETIME_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(s, format) {
            return Ok(ts.with_timezone(&Utc));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&midnight));
            }
        }
    }

    if let Ok(epoch) = s.parse::<f64>() {
        return from_epoch(epoch);
    }

    if let Ok(epoch) = Epoch::from_str(s) {
        let millis = (epoch.to_unix_seconds() * 1000.0).round();
        if millis.is_finite() {
            if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(millis as i64) {
                return Ok(ts);
            }
        }
    }

    Err(ValidationError::UnparseableTimestamp(raw.to_string()))
}

#[cfg(test)]
mod validation_test {
    use super::*;
    use crate::mapping::MappedRecord;

    fn mapped(pairs: &[(CanonicalField, RawValue)]) -> MappedRecord {
        let mut rec = MappedRecord::default();
        for (field, value) in pairs {
            rec.insert(*field, value.clone());
        }
        rec
    }

    fn complete() -> MappedRecord {
        mapped(&[
            (CanonicalField::DeviceId, "TRK-101".into()),
            (CanonicalField::TsUtc, "2024-05-01T12:00:00Z".into()),
            (CanonicalField::Lat, 37.7749.into()),
            (CanonicalField::Lon, (-122.4194).into()),
        ])
    }

    #[test]
    fn test_valid_required_fields() {
        assert_eq!(validate_required_fields(&complete()), Ok(()));
    }

    #[test]
    fn test_missing_device_id() {
        let mut rec = complete();
        rec.remove(CanonicalField::DeviceId);
        let err = validate_required_fields(&rec).unwrap_err();
        assert_eq!(err, ValidationError::MissingField(CanonicalField::DeviceId));
        assert!(err.to_string().contains("device_id"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut rec = complete();
        rec.insert(CanonicalField::Lon, RawValue::Null);
        assert_eq!(
            validate_required_fields(&rec),
            Err(ValidationError::MissingField(CanonicalField::Lon))
        );
    }

    #[test]
    fn test_blank_device_id() {
        let mut rec = complete();
        rec.insert(CanonicalField::DeviceId, "   ".into());
        assert_eq!(validate_required_fields(&rec), Err(ValidationError::EmptyDeviceId));

        rec.insert(CanonicalField::DeviceId, RawValue::Int(42));
        assert_eq!(validate_required_fields(&rec), Ok(()));
    }

    #[test]
    fn test_coordinates() {
        assert_eq!(validate_coordinates(37.7749, -122.4194), Ok(()));
        assert_eq!(validate_coordinates(90.0, 180.0), Ok(()));
        assert_eq!(validate_coordinates(-90.0, -180.0), Ok(()));

        for (lat, lon) in [(91.0, 0.0), (-91.0, 0.0), (0.0, 181.0), (0.0, -181.0), (f64::NAN, 0.0)] {
            let err = validate_coordinates(lat, lon).unwrap_err();
            assert!(err.to_string().contains("out of range"), "{err}");
        }
    }

    #[test]
    fn test_timestamp_range() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(validate_timestamp_at(now, now), Ok(()));
        assert_eq!(validate_timestamp_at(now + Duration::days(2), now), Ok(()));

        let old = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        let err = validate_timestamp_at(old, now).unwrap_err();
        assert!(err.to_string().contains("before 1970"));

        let future = now + Duration::days(2) + Duration::seconds(1);
        let err = validate_timestamp_at(future, now).unwrap_err();
        assert!(err.to_string().contains("future"));

        assert!(validate_timestamp(Utc::now()).is_ok());
    }

    #[test]
    fn test_speed_rules() {
        assert_eq!(validate_speed(Some(30.0)), (Some(30.0), false));
        assert_eq!(validate_speed(Some(0.0)), (Some(0.0), false));
        assert_eq!(validate_speed(Some(120.0)), (Some(120.0), false));
        assert_eq!(validate_speed(Some(-1.0)), (None, true));
        assert_eq!(validate_speed(Some(150.0)), (None, true));
        assert_eq!(validate_speed(None), (None, false));
    }

    #[test]
    fn test_heading_rules() {
        assert_eq!(validate_heading(Some(90.0)), (Some(90.0), false));
        assert_eq!(validate_heading(Some(0.0)), (Some(0.0), false));
        assert_eq!(validate_heading(Some(360.0)), (None, true));
        assert_eq!(validate_heading(Some(-10.0)), (None, true));
        assert_eq!(validate_heading(None), (None, false));
    }

    #[test]
    fn test_hdop_rules() {
        assert_eq!(validate_hdop(Some(1.2)), (Some(1.2), false));
        assert_eq!(validate_hdop(Some(10.0)), (Some(10.0), false));
        assert_eq!(validate_hdop(Some(15.0)), (Some(15.0), true));
        assert_eq!(validate_hdop(Some(-1.0)), (None, true));
    }

    #[test]
    fn test_altitude_rules() {
        assert_eq!(validate_altitude(Some(-12.5)), (Some(-12.5), false));
        assert_eq!(validate_altitude(Some(8_848.0)), (Some(8_848.0), false));
        assert_eq!(validate_altitude(Some(f64::NAN)).1, true);
        assert_eq!(validate_altitude(None), (None, false));
    }

    #[test]
    fn test_repair_typed_and_epoch_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        assert_eq!(repair_timestamp(&RawValue::Timestamp(expected)), Ok(expected));
        assert_eq!(repair_timestamp(&RawValue::Int(1714568400)), Ok(expected));
        assert_eq!(repair_timestamp(&RawValue::Int(1714568400000)), Ok(expected));
        assert_eq!(repair_timestamp(&RawValue::Float(1714568400.0)), Ok(expected));
        assert_eq!(repair_timestamp(&RawValue::Text("1714568400000".into())), Ok(expected));
    }

    #[test]
    fn test_repair_text_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        for text in [
            "2024-05-01T12:00:00Z",
            "2024-05-01T12:00:00+00:00",
            "2024-05-01T14:00:00+02:00",
            "2024-05-01T12:00:00",
            "2024-05-01 12:00:00",
            "2024/05/01 12:00:00",
            "2024-05-01T12:00:00.000",
            "2024-05-01 12:00",
            " 2024-05-01T12:00:00Z ",
        ] {
            assert_eq!(repair_timestamp(&RawValue::from(text)), Ok(expected), "{text}");
        }

        let midnight = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(repair_timestamp(&RawValue::from("2024-05-01")), Ok(midnight));
    }

    #[test]
    fn test_repair_rejects_garbage() {
        assert!(matches!(
            repair_timestamp(&RawValue::from("not a date")),
            Err(ValidationError::UnparseableTimestamp(_))
        ));
        assert_eq!(
            repair_timestamp(&RawValue::Bool(true)),
            Err(ValidationError::UnsupportedTimestampType("bool"))
        );
        assert!(matches!(
            repair_timestamp(&RawValue::Float(f64::NAN)),
            Err(ValidationError::InvalidEpoch(_))
        ));
    }

    #[test]
    fn test_quality_flag_names() {
        let mut flags = QualityFlags::new();
        flags.insert(QualityFlag::SpeedSpike, true);
        assert_eq!(
            serde_json::to_value(&flags).unwrap(),
            serde_json::json!({"flag_speed_spike": true})
        );
    }
}
