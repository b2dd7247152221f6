//! # Ingestion pipeline
//!
//! [`Ingestor`] wires the three layers together for one source batch:
//!
//! ```text
//! create_job(running) → normalize → upsert accepted points → update_job_status
//! ```
//!
//! The terminal status is `succeeded` when no record was rejected and `partial` otherwise. The
//! stored error sample holds the first ten rejects by batch index. Any failure outside
//! per-record validation (storage, unreadable file, bad custom mapping) marks the job `failed`
//! with `{0: error text}` as its only sample entry and is returned to the caller.
//!
//! The repository and the registry are injected, so the same pipeline runs against
//! [`MemoryStore`](crate::storage::MemoryStore) in tests and
//! [`SqliteStore`](crate::storage::SqliteStore) in a service.
//!
//! ## Example
//! -----------------
//! ```rust,no_run
//! use std::sync::Arc;
//! use bhulan::ingest::Ingestor;
//! use bhulan::storage::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let ingestor = Ingestor::new(store.clone(), store.clone());
//! let payload = serde_json::json!({
//!     "device_id": "T1", "timestamp": "2024-05-01T12:00:00Z", "lat": 37.77, "lon": -122.41
//! });
//! let result = ingestor.ingest_payload(payload, Some("generic"), None, None).unwrap();
//! assert_eq!(result.accepted, 1);
//! ```
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use camino::Utf8Path;
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bhulan_errors::BhulanError;
use crate::constants::ErrorIndex;
use crate::files::{detect_file_type, infer_plan_from_file, iter_records};
use crate::jobs::{Job, JobParams, JobSource, JobStats, JobStatus};
use crate::mapping::MappingPlan;
use crate::normalize::{new_ingest_id, NormalizationResult};
use crate::record::{record_from_json, RawRecord};
use crate::settings::Settings;
use crate::storage::{JobRegistry, TrackPointRepository};
use crate::track_point::TrackPoint;

/// A job together with the number of its points currently stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    #[serde(flatten)]
    pub job: Job,
    pub point_count_in_db: usize,
}

/// Releases an in-flight slot on drop.
struct InflightSlot<'a>(&'a AtomicUsize);

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Ingestor<R, J> {
    repo: R,
    registry: J,
    max_batch_size: usize,
    max_inflight_jobs: usize,
    default_vendor: String,
    inflight: AtomicUsize,
}

impl<R: TrackPointRepository, J: JobRegistry> Ingestor<R, J> {
    /// Pipeline with the default [`Settings`].
    pub fn new(repo: R, registry: J) -> Self {
        Self::with_settings(repo, registry, &Settings::default())
    }

    /// Pipeline taking its chunk size, in-flight limit and fallback vendor from `settings`.
    pub fn with_settings(repo: R, registry: J, settings: &Settings) -> Self {
        Ingestor {
            repo,
            registry,
            max_batch_size: settings.max_batch_size.max(1),
            max_inflight_jobs: settings.max_inflight_jobs.max(1),
            default_vendor: settings.default_vendor.trim().to_string(),
            inflight: AtomicUsize::new(0),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn registry(&self) -> &J {
        &self.registry
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_inflight_jobs(&self) -> usize {
        self.max_inflight_jobs
    }

    /// Vendor assumed for payloads that do not name one.
    pub fn default_vendor(&self) -> &str {
        &self.default_vendor
    }

    fn acquire_slot(&self) -> Result<InflightSlot<'_>, BhulanError> {
        let previous = self.inflight.fetch_add(1, Ordering::AcqRel);
        let slot = InflightSlot(&self.inflight);
        if previous >= self.max_inflight_jobs {
            return Err(BhulanError::TooManyInflightJobs(self.max_inflight_jobs));
        }
        Ok(slot)
    }

    /// Normalize `records`, store the accepted points and track the batch as one job.
    ///
    /// Arguments
    /// ---------
    /// * `records`: source records, indexed by position in the slice
    /// * `plan`: mapping plan for every record
    /// * `source`: job source tag
    /// * `params`: descriptive job parameters
    /// * `ingest_id`: job id, a fresh UUID v4 when `None`
    ///
    /// Return
    /// ------
    /// * the batch [`NormalizationResult`] (all rejects, uncapped)
    /// * `Err` when the job could not be created, or when storage failed (the job is then
    ///   marked `failed`)
    pub fn ingest_records(
        &self,
        records: &[RawRecord],
        plan: &MappingPlan,
        source: JobSource,
        params: JobParams,
        ingest_id: Option<&str>,
    ) -> Result<NormalizationResult, BhulanError> {
        let _slot = self.acquire_slot()?;
        let ingest_id = ingest_id.map_or_else(new_ingest_id, str::to_string);
        self.start_job(&ingest_id, source, params)?;

        let outcome = self.store_batch(records, plan, &ingest_id);
        self.close_job(&ingest_id, outcome)
    }

    /// Webhook-style entry point: a JSON object or an array of objects from `vendor`.
    ///
    /// A missing or blank `vendor` falls back to the configured default vendor.
    /// `mapping_json`, when given, replaces the vendor plan (see [`MappingPlan::from_json`]).
    /// A payload that is neither an object nor an array of objects is rejected before any job
    /// is created.
    pub fn ingest_payload(
        &self,
        payload: serde_json::Value,
        vendor: Option<&str>,
        mapping_json: Option<&str>,
        ingest_id: Option<&str>,
    ) -> Result<NormalizationResult, BhulanError> {
        let vendor = vendor
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(self.default_vendor.as_str());
        let records = records_from_payload(payload)?;
        let plan = match mapping_json {
            Some(json) => MappingPlan::from_json(json)?,
            None => MappingPlan::for_vendor(vendor),
        };
        let params = JobParams::from([
            ("vendor".to_string(), serde_json::Value::from(vendor)),
            ("record_count".to_string(), serde_json::Value::from(records.len())),
        ]);
        self.ingest_records(&records, &plan, JobSource::Webhook, params, ingest_id)
    }

    /// Ingest a CSV / JSON / NDJSON file as a single job.
    ///
    /// Records are streamed in chunks of `max_batch_size`; each chunk is normalized and
    /// upserted before the next is read. Error indices are file-global record positions. When
    /// `plan` is `None`, it is inferred from the file headers.
    pub fn ingest_file(
        &self,
        path: &Utf8Path,
        plan: Option<&MappingPlan>,
        ingest_id: Option<&str>,
    ) -> Result<NormalizationResult, BhulanError> {
        let _slot = self.acquire_slot()?;
        let ingest_id = ingest_id.map_or_else(new_ingest_id, str::to_string);
        let vendor = plan.map_or("generic", MappingPlan::vendor);
        let params = JobParams::from([
            ("file_path".to_string(), serde_json::Value::from(path.as_str())),
            ("vendor".to_string(), serde_json::Value::from(vendor)),
        ]);
        self.start_job(&ingest_id, JobSource::File, params)?;

        let outcome = self.store_file(path, plan, &ingest_id);
        self.close_job(&ingest_id, outcome)
    }

    /// Job document plus its stored point count, or `None` for an unknown id.
    pub fn job_report(&self, ingest_id: &str) -> Result<Option<JobReport>, BhulanError> {
        let Some(job) = self.registry.get_job(ingest_id)? else {
            return Ok(None);
        };
        let point_count_in_db = self.repo.count_by_ingest_id(ingest_id)?;
        Ok(Some(JobReport {
            job,
            point_count_in_db,
        }))
    }

    fn start_job(&self, ingest_id: &str, source: JobSource, params: JobParams) -> Result<(), BhulanError> {
        self.registry.create_job(ingest_id, source, params)?;
        info!(ingest_id, source = %source, "job started");
        Ok(())
    }

    fn close_job(
        &self,
        ingest_id: &str,
        outcome: Result<NormalizationResult, BhulanError>,
    ) -> Result<NormalizationResult, BhulanError> {
        match outcome {
            Ok(result) => {
                let status = JobStatus::from_result(&result);
                if let Err(err) = self.registry.update_job_status(
                    ingest_id,
                    status,
                    Some(JobStats::from(&result)),
                    Some(&result.errors),
                ) {
                    return Err(self.fail_job(ingest_id, err.into()));
                }
                info!(
                    ingest_id,
                    status = %status,
                    accepted = result.accepted,
                    rejected = result.rejected,
                    "job finished"
                );
                Ok(result)
            }
            Err(err) => Err(self.fail_job(ingest_id, err)),
        }
    }

    /// Best-effort transition to `failed` with `{0: err}` as sample; hands `err` back.
    fn fail_job(&self, ingest_id: &str, err: BhulanError) -> BhulanError {
        let sample = ErrorIndex::from([(0, err.to_string())]);
        if let Err(update_err) =
            self.registry
                .update_job_status(ingest_id, JobStatus::Failed, None, Some(&sample))
        {
            warn!(ingest_id, error = %update_err, "could not mark job as failed");
        }
        warn!(ingest_id, error = %err, "job failed");
        err
    }

    fn upsert(&self, points: &[TrackPoint], ingest_id: &str) -> Result<usize, BhulanError> {
        if points.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();
        let written = self.repo.upsert_batch(points)?;
        debug!(
            ingest_id,
            points = points.len(),
            written,
            duration_ms = start.elapsed().as_millis() as u64,
            "points upserted"
        );
        Ok(written)
    }

    fn normalize(&self, records: &[RawRecord], plan: &MappingPlan, ingest_id: &str) -> (NormalizationResult, Vec<TrackPoint>) {
        #[cfg(feature = "parallel")]
        {
            crate::normalize::normalize_batch_parallel(records, plan, Some(ingest_id))
        }
        #[cfg(not(feature = "parallel"))]
        {
            crate::normalize::normalize_batch(records, plan, Some(ingest_id))
        }
    }

    fn store_batch(
        &self,
        records: &[RawRecord],
        plan: &MappingPlan,
        ingest_id: &str,
    ) -> Result<NormalizationResult, BhulanError> {
        let (result, points) = self.normalize(records, plan, ingest_id);
        self.upsert(&points, ingest_id)?;
        Ok(result)
    }

    fn store_file(
        &self,
        path: &Utf8Path,
        plan: Option<&MappingPlan>,
        ingest_id: &str,
    ) -> Result<NormalizationResult, BhulanError> {
        detect_file_type(path)?;
        let inferred;
        let plan = match plan {
            Some(plan) => plan,
            None => {
                inferred = infer_plan_from_file(path)?;
                &inferred
            }
        };

        let mut total = NormalizationResult {
            ingest_id: ingest_id.to_string(),
            ..NormalizationResult::default()
        };
        let mut offset = 0;

        let chunks = iter_records(path)?.chunks(self.max_batch_size);
        for chunk in &chunks {
            let records = chunk.collect::<Result<Vec<_>, _>>()?;
            let (result, points) = self.normalize(&records, plan, ingest_id);

            total.accepted += result.accepted;
            total.rejected += result.rejected;
            total
                .errors
                .extend(result.errors.into_iter().map(|(idx, msg)| (offset + idx, msg)));
            offset += records.len();

            self.upsert(&points, ingest_id)?;
        }
        Ok(total)
    }
}

/// Records of a webhook body: one object, or an array of objects.
pub fn records_from_payload(payload: serde_json::Value) -> Result<Vec<RawRecord>, BhulanError> {
    let invalid = |reason: String| BhulanError::InvalidInputFile {
        path: "<payload>".into(),
        reason,
    };
    match payload {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                record_from_json(item).ok_or_else(|| invalid(format!("entry {i} is not an object")))
            })
            .collect(),
        object @ serde_json::Value::Object(_) => Ok(vec![record_from_json(object)
            .ok_or_else(|| invalid("payload is not an object".into()))?]),
        other => Err(invalid(format!("expected an object or an array, got {other}"))),
    }
}
