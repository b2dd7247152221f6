//! # Canonical store and job registry
//!
//! Storage is reached only through two traits, so every component receives its store as an
//! explicit handle and tests can substitute an in-memory one:
//!
//! * [`TrackPointRepository`] – idempotent, content-hash keyed point storage,
//! * [`JobRegistry`] – persistence of [`Job`] documents.
//!
//! Both take `&self` and are `Send + Sync`; implementations handle their own interior locking.
//!
//! ## Idempotence
//! -----------------
//! [`TrackPointRepository::upsert_batch`] keys each point by
//! [`TrackPoint::content_hash`](crate::track_point::TrackPoint::content_hash). A point whose
//! hash is absent is inserted, one whose hash exists overwrites the stored fields. Only
//! inserts and effective modifications are counted, so replaying a batch never grows the
//! store and returns `0`.
//!
//! ## Adapters
//! -----------------
//! * [`memory::MemoryStore`] – in-process document store with hash, `(device_id, ts_utc)`,
//!   `ingest_id` and geospatial grid indexes.
//! * [`sqlite::SqliteStore`] – rusqlite-backed store, JSON documents plus indexed columns.
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::constants::{Degree, ErrorIndex, Meter};
use crate::jobs::{Job, JobParams, JobSource, JobStats, JobStatus};
use crate::track_point::TrackPoint;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Document (de)serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Corrupted stored value: {0}")]
    Corrupted(String),
}

/// Idempotent storage of canonical points.
pub trait TrackPointRepository: Send + Sync {
    /// Create the unique hash index and the query indexes. Safe to call repeatedly.
    fn create_indexes(&self) -> Result<(), StoreError>;

    /// Upsert `points` by content hash.
    ///
    /// Return
    /// ------
    /// * the number of points inserted or effectively modified (a replay returns 0)
    fn upsert_batch(&self, points: &[TrackPoint]) -> Result<usize, StoreError>;

    /// Whether a point with this content hash is stored.
    fn exists(&self, hash: &str) -> Result<bool, StoreError>;

    /// Points of `device_id` with `start <= ts_utc <= end`, ascending by time.
    fn get_by_device_and_time(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TrackPoint>, StoreError>;

    /// Number of stored points whose `ingest_id` is `ingest_id`.
    fn count_by_ingest_id(&self, ingest_id: &str) -> Result<usize, StoreError>;

    /// Total number of stored points.
    fn count(&self) -> Result<usize, StoreError>;

    /// Up to `limit` points within `radius_m` of `(lon, lat)`, nearest first.
    fn find_near(
        &self,
        lon: Degree,
        lat: Degree,
        radius_m: Meter,
        limit: usize,
    ) -> Result<Vec<TrackPoint>, StoreError>;
}

/// Persistence of ingestion jobs, keyed by `ingest_id`.
///
/// One logical owner updates a given job; concurrent updates of the same id resolve as
/// last writer wins.
pub trait JobRegistry: Send + Sync {
    /// Insert a `running` job. Fails with [`StoreError::DuplicateJob`] if the id exists.
    fn create_job(
        &self,
        ingest_id: &str,
        source: JobSource,
        params: JobParams,
    ) -> Result<Job, StoreError>;

    /// Set the status (stamping `finished_at` when terminal) and overwrite stats and error
    /// sample when provided. Fails with [`StoreError::JobNotFound`] for an unknown id.
    fn update_job_status(
        &self,
        ingest_id: &str,
        status: JobStatus,
        stats: Option<JobStats>,
        error_sample: Option<&ErrorIndex>,
    ) -> Result<Job, StoreError>;

    /// The job document, or `None` if it never existed.
    fn get_job(&self, ingest_id: &str) -> Result<Option<Job>, StoreError>;
}

impl<T: TrackPointRepository + ?Sized> TrackPointRepository for Arc<T> {
    fn create_indexes(&self) -> Result<(), StoreError> {
        (**self).create_indexes()
    }

    fn upsert_batch(&self, points: &[TrackPoint]) -> Result<usize, StoreError> {
        (**self).upsert_batch(points)
    }

    fn exists(&self, hash: &str) -> Result<bool, StoreError> {
        (**self).exists(hash)
    }

    fn get_by_device_and_time(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TrackPoint>, StoreError> {
        (**self).get_by_device_and_time(device_id, start, end)
    }

    fn count_by_ingest_id(&self, ingest_id: &str) -> Result<usize, StoreError> {
        (**self).count_by_ingest_id(ingest_id)
    }

    fn count(&self) -> Result<usize, StoreError> {
        (**self).count()
    }

    fn find_near(
        &self,
        lon: Degree,
        lat: Degree,
        radius_m: Meter,
        limit: usize,
    ) -> Result<Vec<TrackPoint>, StoreError> {
        (**self).find_near(lon, lat, radius_m, limit)
    }
}

impl<T: JobRegistry + ?Sized> JobRegistry for Arc<T> {
    fn create_job(
        &self,
        ingest_id: &str,
        source: JobSource,
        params: JobParams,
    ) -> Result<Job, StoreError> {
        (**self).create_job(ingest_id, source, params)
    }

    fn update_job_status(
        &self,
        ingest_id: &str,
        status: JobStatus,
        stats: Option<JobStats>,
        error_sample: Option<&ErrorIndex>,
    ) -> Result<Job, StoreError> {
        (**self).update_job_status(ingest_id, status, stats, error_sample)
    }

    fn get_job(&self, ingest_id: &str) -> Result<Option<Job>, StoreError> {
        (**self).get_job(ingest_id)
    }
}
