//! # Record and batch normalization
//!
//! Orchestrates `mapping → validation → TrackPoint` for one record ([`normalize_record`]) and
//! for a batch ([`normalize_batch`]).
//!
//! ## Failure model
//! -----------------
//! Each record yields `Result<TrackPoint, RecordError>`. A batch never aborts on a bad record:
//! the failure is counted, its message is stored under the record's **batch index** in
//! [`NormalizationResult::errors`], and processing moves on. Accepted points keep input order
//! and carry `seq_no = batch index`, so a point and an error can always be traced back to the
//! exact source row.
//!
//! With the `parallel` feature, [`normalize_batch_parallel`] spreads records over the rayon
//! pool and returns the same result, in the same order, as the sequential path.
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::ErrorIndex;
use crate::mapping::{apply_mapping, CanonicalField, MappedRecord, MappingError, MappingPlan};
use crate::record::{RawRecord, RawValue};
use crate::track_point::{PointMeta, RawPayload, TrackPoint};
use crate::validation::{
    repair_timestamp, validate_altitude, validate_coordinates, validate_hdop, validate_heading,
    validate_required_fields, validate_speed, validate_timestamp, QualityFlag, QualityFlags,
    ValidationError,
};

/// Why one record was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Outcome of one batch. Built once, never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationResult {
    pub accepted: usize,
    pub rejected: usize,
    /// Batch index → error message, for every rejected record (not truncated here).
    pub errors: ErrorIndex,
    pub ingest_id: String,
}

impl NormalizationResult {
    /// Number of records the batch contained.
    pub fn read(&self) -> usize {
        self.accepted + self.rejected
    }

    pub fn is_clean(&self) -> bool {
        self.rejected == 0
    }
}

/// Fresh random ingestion id (UUID v4).
pub fn new_ingest_id() -> String {
    Uuid::new_v4().to_string()
}

/// Normalize one source record.
///
/// Arguments
/// ---------
/// * `record`: the untouched source record, copied into `raw.original`
/// * `plan`: mapping plan to apply
/// * `ingest_id`: batch the point belongs to
/// * `seq_no`: position of `record` in its source batch
///
/// Return
/// ------
/// * the canonical point, or the [`RecordError`] that rejected the record
///
/// Speed and heading outside their ranges, non-numeric heading/HDOP, and HDOP above 10 do not
/// reject: the point is accepted and the matching flag is recorded in
/// `raw.meta.quality_flags`.
pub fn normalize_record(
    record: &RawRecord,
    plan: &MappingPlan,
    ingest_id: &str,
    seq_no: usize,
) -> Result<TrackPoint, RecordError> {
    let mapped = apply_mapping(record, plan)?;

    validate_required_fields(&mapped)?;

    let ts_utc = repair_timestamp(required(&mapped, CanonicalField::TsUtc)?)?;
    validate_timestamp(ts_utc)?;

    let lat = required_number(&mapped, CanonicalField::Lat)?;
    let lon = required_number(&mapped, CanonicalField::Lon)?;
    validate_coordinates(lat, lon)?;

    let device_id = required(&mapped, CanonicalField::DeviceId)?
        .as_text()
        .map(|s| s.trim().to_string())
        .ok_or(ValidationError::EmptyDeviceId)?;

    let mut flags = QualityFlags::new();

    let (speed_mps, speed_flag) = soft_number(&mapped, CanonicalField::SpeedMps, validate_speed);
    let (heading_deg, heading_flag) =
        soft_number(&mapped, CanonicalField::HeadingDeg, validate_heading);
    let (hdop, hdop_flag) = soft_number(&mapped, CanonicalField::Hdop, validate_hdop);
    let (alt_m, alt_flag) = soft_number(&mapped, CanonicalField::AltM, validate_altitude);

    for (flagged, flag) in [
        (speed_flag, QualityFlag::SpeedSpike),
        (heading_flag, QualityFlag::BadHeading),
        (hdop_flag, QualityFlag::BadHdop),
        (alt_flag, QualityFlag::BadAltitude),
    ] {
        if flagged {
            flags.insert(flag, true);
        }
    }

    let src = mapped
        .get(CanonicalField::Src)
        .and_then(RawValue::as_text)
        .unwrap_or_else(|| plan.vendor().to_string());

    let mut raw = RawPayload::new(record.clone());
    add_quality_flags(&mut raw, flags);

    Ok(TrackPoint {
        device_id,
        ts_utc,
        lat,
        lon,
        speed_mps,
        heading_deg,
        alt_m,
        hdop,
        src,
        raw,
        ingest_id: ingest_id.to_string(),
        seq_no,
    })
}

/// Attach `flags` under `raw.meta.quality_flags`, merging with flags already present.
/// Does nothing when `flags` is empty.
pub fn add_quality_flags(raw: &mut RawPayload, flags: QualityFlags) {
    if flags.is_empty() {
        return;
    }
    raw.meta
        .get_or_insert_with(PointMeta::default)
        .quality_flags
        .extend(flags);
}

fn required(mapped: &MappedRecord, field: CanonicalField) -> Result<&RawValue, ValidationError> {
    mapped
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingField(field))
}

fn required_number(mapped: &MappedRecord, field: CanonicalField) -> Result<f64, ValidationError> {
    let value = required(mapped, field)?;
    value.as_f64().ok_or_else(|| ValidationError::NotNumeric {
        field,
        value: value.to_string(),
    })
}

/// Read an optional numeric field and run its soft rule. A present but non-numeric value is
/// treated as absent and flagged.
fn soft_number(
    mapped: &MappedRecord,
    field: CanonicalField,
    rule: fn(Option<f64>) -> (Option<f64>, bool),
) -> (Option<f64>, bool) {
    match mapped.get(field) {
        None | Some(RawValue::Null) => (None, false),
        Some(value) => match value.as_f64() {
            Some(v) => rule(Some(v)),
            None => (None, true),
        },
    }
}

fn resolve_ingest_id(ingest_id: Option<&str>) -> String {
    ingest_id.map_or_else(new_ingest_id, str::to_string)
}

fn collect_outcomes<I>(ingest_id: String, outcomes: I) -> (NormalizationResult, Vec<TrackPoint>)
where
    I: IntoIterator<Item = (usize, Result<TrackPoint, RecordError>)>,
{
    let mut result = NormalizationResult {
        ingest_id,
        ..NormalizationResult::default()
    };
    let mut points = Vec::new();

    for (idx, outcome) in outcomes {
        match outcome {
            Ok(point) => points.push(point),
            Err(err) => {
                debug!(ingest_id = %result.ingest_id, index = idx, error = %err, "record rejected");
                result.rejected += 1;
                result.errors.insert(idx, err.to_string());
            }
        }
    }
    result.accepted = points.len();
    (result, points)
}

/// Normalize a batch of records, independently and in order.
///
/// Arguments
/// ---------
/// * `records`: source records; the slice index is each record's `seq_no`
/// * `plan`: mapping plan applied to every record
/// * `ingest_id`: batch identifier, a fresh UUID v4 when `None`
///
/// Return
/// ------
/// * the batch [`NormalizationResult`] and the accepted points, in input order
pub fn normalize_batch(
    records: &[RawRecord],
    plan: &MappingPlan,
    ingest_id: Option<&str>,
) -> (NormalizationResult, Vec<TrackPoint>) {
    let start = Instant::now();
    let ingest_id = resolve_ingest_id(ingest_id);

    let outcomes = records
        .iter()
        .enumerate()
        .map(|(idx, record)| (idx, normalize_record(record, plan, &ingest_id, idx)));
    let (result, points) = collect_outcomes(ingest_id.clone(), outcomes);

    info!(
        ingest_id = %result.ingest_id,
        vendor = plan.vendor(),
        batch_size = records.len(),
        accepted = result.accepted,
        rejected = result.rejected,
        duration_ms = start.elapsed().as_millis() as u64,
        "batch normalized"
    );
    (result, points)
}

/// Same contract and output as [`normalize_batch`], with records normalized on the rayon
/// thread pool.
#[cfg(feature = "parallel")]
pub fn normalize_batch_parallel(
    records: &[RawRecord],
    plan: &MappingPlan,
    ingest_id: Option<&str>,
) -> (NormalizationResult, Vec<TrackPoint>) {
    use rayon::prelude::*;

    let start = Instant::now();
    let ingest_id = resolve_ingest_id(ingest_id);

    let outcomes: Vec<_> = records
        .par_iter()
        .enumerate()
        .map(|(idx, record)| (idx, normalize_record(record, plan, &ingest_id, idx)))
        .collect();
    let (result, points) = collect_outcomes(ingest_id, outcomes);

    info!(
        ingest_id = %result.ingest_id,
        vendor = plan.vendor(),
        batch_size = records.len(),
        accepted = result.accepted,
        rejected = result.rejected,
        duration_ms = start.elapsed().as_millis() as u64,
        "batch normalized (parallel)"
    );
    (result, points)
}
