//! # Canonical track point
//!
//! [`TrackPoint`] is the single normalized representation every vendor payload converges to,
//! and the unit of storage. A point is only ever built by the normalizer after all hard
//! validation rules passed, so a stored point always satisfies the range constraints below:
//!
//! | field         | constraint                                   |
//! |---------------|----------------------------------------------|
//! | `device_id`   | non-empty                                    |
//! | `ts_utc`      | `[1970-01-01, now + 2 days]`                 |
//! | `lat` / `lon` | `[-90, 90]` / `[-180, 180]`                  |
//! | `speed_mps`   | `None` or `[0, 120]`                         |
//! | `heading_deg` | `None` or `[0, 360)`                         |
//! | `hdop`        | `None` or `≥ 0` (flagged when `> 10`)        |
//!
//! ## Content hash
//! -----------------
//! [`TrackPoint::content_hash`] is the SHA-256 of
//! `"{device_id}:{ts_utc as RFC 3339}:{lat:.6}:{lon:.6}"`, hex encoded. It is the
//! deduplication key of the store: two points with the same device, instant, and position
//! rounded to 10⁻⁶ degrees are the same physical observation whatever their source.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{Degree, Meter, MetersPerSecond, HASH_COORD_DECIMALS};
use crate::record::RawRecord;
use crate::validation::QualityFlags;

/// Diagnostics attached to a point next to its original payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointMeta {
    pub quality_flags: QualityFlags,
}

/// The `raw` member of a point: the untouched source record, plus quality flags when any
/// validation rule fired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub original: RawRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PointMeta>,
}

impl RawPayload {
    pub fn new(original: RawRecord) -> Self {
        RawPayload {
            original,
            meta: None,
        }
    }

    /// Quality flags, if any were attached.
    pub fn quality_flags(&self) -> Option<&QualityFlags> {
        self.meta.as_ref().map(|meta| &meta.quality_flags)
    }
}

/// One canonical GPS observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub device_id: String,
    pub ts_utc: DateTime<Utc>,
    pub lat: Degree,
    pub lon: Degree,
    pub speed_mps: Option<MetersPerSecond>,
    pub heading_deg: Option<Degree>,
    pub alt_m: Option<Meter>,
    pub hdop: Option<f64>,
    pub src: String,
    #[serde(default)]
    pub raw: RawPayload,
    pub ingest_id: String,
    pub seq_no: usize,
}

/// `value` rounded to the hash precision; `-0.0` becomes `0.0`.
fn hash_coordinate(value: Degree) -> Degree {
    let scale = 10f64.powi(HASH_COORD_DECIMALS as i32);
    (value * scale).round() / scale + 0.0
}

impl TrackPoint {
    /// Bare point with only the required fields set; optional fields are `None`, `src` is
    /// `"generic"`, `ingest_id` is empty and `seq_no` is 0.
    ///
    /// Intended for tests and for callers building points outside the normalizer. No range
    /// check is performed here.
    pub fn new(device_id: impl Into<String>, ts_utc: DateTime<Utc>, lat: Degree, lon: Degree) -> Self {
        TrackPoint {
            device_id: device_id.into(),
            ts_utc,
            lat,
            lon,
            speed_mps: None,
            heading_deg: None,
            alt_m: None,
            hdop: None,
            src: "generic".to_string(),
            raw: RawPayload::default(),
            ingest_id: String::new(),
            seq_no: 0,
        }
    }

    pub fn with_speed(mut self, speed_mps: MetersPerSecond) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_ingest_id(mut self, ingest_id: impl Into<String>, seq_no: usize) -> Self {
        self.ingest_id = ingest_id.into();
        self.seq_no = seq_no;
        self
    }

    /// Canonical text fed to the hash: `device_id:ts:lat:lon`.
    ///
    /// Coordinates are rounded to [`HASH_COORD_DECIMALS`] before formatting, and a rounded
    /// zero is always written unsigned.
    pub fn hash_key(&self) -> String {
        format!(
            "{}:{}:{:.prec$}:{:.prec$}",
            self.device_id,
            self.ts_utc.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            hash_coordinate(self.lat),
            hash_coordinate(self.lon),
            prec = HASH_COORD_DECIMALS
        )
    }

    /// Deterministic deduplication key (hex SHA-256 of [`TrackPoint::hash_key`]).
    pub fn content_hash(&self) -> String {
        format!("{:x}", Sha256::digest(self.hash_key().as_bytes()))
    }

    /// GeoJSON location, `[lon, lat]` ordered.
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lon, self.lat)
    }

    /// Storage document for this point (point fields + `loc` + `_hash`).
    pub fn to_document(&self) -> PointDocument {
        PointDocument {
            loc: self.location(),
            hash: self.content_hash(),
            point: self.clone(),
        }
    }
}

/// GeoJSON `Point` geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(lon: Degree, lat: Degree) -> Self {
        GeoPoint {
            kind: "Point".to_string(),
            coordinates: [lon, lat],
        }
    }

    pub fn lon(&self) -> Degree {
        self.coordinates[0]
    }

    pub fn lat(&self) -> Degree {
        self.coordinates[1]
    }
}

/// A point as persisted: every [`TrackPoint`] field, plus `loc` and `_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointDocument {
    #[serde(flatten)]
    pub point: TrackPoint,
    pub loc: GeoPoint,
    #[serde(rename = "_hash")]
    pub hash: String,
}

impl From<PointDocument> for TrackPoint {
    fn from(doc: PointDocument) -> Self {
        doc.point
    }
}

#[cfg(test)]
mod track_point_test {
    use super::*;
    use crate::record::RawValue;
    use crate::validation::QualityFlag;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_hash_key_layout() {
        let p = TrackPoint::new("T1", t0(), 1.0, -2.5);
        assert_eq!(p.hash_key(), "T1:2024-05-01T12:00:00+00:00:1.000000:-2.500000");
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let hash = TrackPoint::new("T1", t0(), 1.0, 1.0).content_hash();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_hash_ignores_non_key_fields() {
        let a = TrackPoint::new("T1", t0(), 1.0, 1.0).with_ingest_id("job-a", 0);
        let mut b = TrackPoint::new("T1", t0(), 1.0, 1.0)
            .with_speed(12.0)
            .with_ingest_id("job-b", 7);
        b.src = "samsara".into();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_rounds_to_micro_degrees() {
        let a = TrackPoint::new("T1", t0(), 1.0, 1.0);
        let b = TrackPoint::new("T1", t0(), 1.000_000_1, 1.0);
        let c = TrackPoint::new("T1", t0(), 1.000_01, 1.0);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_ne!(
            a.content_hash(),
            TrackPoint::new("T2", t0(), 1.0, 1.0).content_hash()
        );
    }

    #[test]
    fn test_signed_zero_coordinates_hash_alike() {
        let zero = TrackPoint::new("T1", t0(), 0.0, 0.0);
        for (lat, lon) in [(-0.0, 0.0), (0.0, -0.0), (-0.000_000_1, 0.0), (0.0, -0.000_000_4)] {
            let other = TrackPoint::new("T1", t0(), lat, lon);
            assert_eq!(other.hash_key(), zero.hash_key(), "({lat}, {lon})");
            assert_eq!(other.content_hash(), zero.content_hash());
        }
        assert_eq!(zero.hash_key(), "T1:2024-05-01T12:00:00+00:00:0.000000:0.000000");
        assert_ne!(
            TrackPoint::new("T1", t0(), -0.000_001, 0.0).content_hash(),
            zero.content_hash()
        );
    }

    #[test]
    fn test_document_shape() {
        let mut point = TrackPoint::new("T1", t0(), 37.7749, -122.4194).with_ingest_id("job", 3);
        point.raw.original.insert("lat".into(), RawValue::Float(37.7749));
        let mut flags = QualityFlags::new();
        flags.insert(QualityFlag::BadHdop, true);
        point.raw.meta = Some(PointMeta { quality_flags: flags });

        let doc = serde_json::to_value(point.to_document()).unwrap();
        assert_eq!(doc["loc"]["type"], "Point");
        assert_eq!(doc["loc"]["coordinates"][0], -122.4194);
        assert_eq!(doc["loc"]["coordinates"][1], 37.7749);
        assert_eq!(doc["_hash"], point.content_hash());
        assert_eq!(doc["device_id"], "T1");
        assert_eq!(doc["seq_no"], 3);
        assert_eq!(doc["raw"]["meta"]["quality_flags"]["flag_bad_hdop"], true);
        assert!(doc["speed_mps"].is_null());

        let back: PointDocument = serde_json::from_value(doc).unwrap();
        assert_eq!(TrackPoint::from(back), point);
    }

    #[test]
    fn test_meta_omitted_without_flags() {
        let point = TrackPoint::new("T1", t0(), 0.0, 0.0);
        let doc = serde_json::to_value(&point).unwrap();
        assert!(doc["raw"].get("meta").is_none());
        assert!(point.raw.quality_flags().is_none());
    }
}
