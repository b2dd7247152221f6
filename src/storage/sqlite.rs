//! SQLite-backed store (rusqlite).
//!
//! Each point is stored as its JSON [`PointDocument`] next to the extracted columns the
//! indexes need:
//!
//! ```text
//! track_points(hash PK, device_id, ts_us, lat, lon, ingest_id, doc)
//!   idx_track_points_device_ts (device_id, ts_us)
//!   idx_track_points_loc       (lon, lat)
//!   idx_track_points_ingest    (ingest_id)
//! ingest_jobs(ingest_id PK, status, doc)
//! ```
//!
//! Upserts use `INSERT .. ON CONFLICT(hash) DO UPDATE .. WHERE doc IS NOT excluded.doc`, so the
//! number of changed rows is exactly the number of inserts plus effective modifications. The
//! connection busy timeout is the storage-adapter timeout.
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::constants::{Degree, ErrorIndex, Meter};
use crate::jobs::{Job, JobParams, JobSource, JobStats, JobStatus};
use crate::smoothing::geodesy::{haversine_distance, SearchBounds};
use crate::storage::{JobRegistry, StoreError, TrackPointRepository};
use crate::track_point::{PointDocument, TrackPoint};

/// Default busy timeout applied by [`SqliteStore::open`].
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` with the default busy timeout.
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open (or create) the database file at `path`.
    ///
    /// Arguments
    /// ---------
    /// * `path`: database file; parent directories must exist
    /// * `busy_timeout`: how long a statement waits on a locked database before failing
    pub fn open_with_timeout(
        path: impl AsRef<Utf8Path>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref().as_std_path())?;
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        store.create_indexes()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS track_points (
              hash TEXT PRIMARY KEY,
              device_id TEXT NOT NULL,
              ts_us INTEGER NOT NULL,
              lat REAL NOT NULL,
              lon REAL NOT NULL,
              ingest_id TEXT NOT NULL,
              doc TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ingest_jobs (
              ingest_id TEXT PRIMARY KEY,
              status TEXT NOT NULL,
              doc TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

fn decode_point(doc: &str) -> Result<TrackPoint, StoreError> {
    Ok(serde_json::from_str::<PointDocument>(doc)?.into())
}

fn decode_job(doc: &str) -> Result<Job, StoreError> {
    Ok(serde_json::from_str(doc)?)
}

impl TrackPointRepository for SqliteStore {
    fn create_indexes(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_track_points_device_ts ON track_points(device_id, ts_us);
            CREATE INDEX IF NOT EXISTS idx_track_points_loc ON track_points(lon, lat);
            CREATE INDEX IF NOT EXISTS idx_track_points_ingest ON track_points(ingest_id);
            "#,
        )?;
        Ok(())
    }

    fn upsert_batch(&self, points: &[TrackPoint]) -> Result<usize, StoreError> {
        if points.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO track_points (hash, device_id, ts_us, lat, lon, ingest_id, doc)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(hash) DO UPDATE SET
                  device_id = excluded.device_id,
                  ts_us = excluded.ts_us,
                  lat = excluded.lat,
                  lon = excluded.lon,
                  ingest_id = excluded.ingest_id,
                  doc = excluded.doc
                WHERE track_points.doc IS NOT excluded.doc
                "#,
            )?;
            for point in points {
                let doc = point.to_document();
                let json = serde_json::to_string(&doc)?;
                written += stmt.execute(params![
                    doc.hash,
                    point.device_id,
                    point.ts_utc.timestamp_micros(),
                    point.lat,
                    point.lon,
                    point.ingest_id,
                    json,
                ])?;
            }
        }
        tx.commit()?;
        debug!(batch = points.len(), written, "sqlite upsert");
        Ok(written)
    }

    fn exists(&self, hash: &str) -> Result<bool, StoreError> {
        let found = self
            .lock()?
            .query_row(
                "SELECT 1 FROM track_points WHERE hash = ?1",
                params![hash],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_by_device_and_time(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TrackPoint>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT doc FROM track_points
            WHERE device_id = ?1 AND ts_us BETWEEN ?2 AND ?3
            ORDER BY ts_us ASC, hash ASC
            "#,
        )?;
        let docs = stmt
            .query_map(
                params![device_id, start.timestamp_micros(), end.timestamp_micros()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        docs.iter().map(|doc| decode_point(doc)).collect()
    }

    fn count_by_ingest_id(&self, ingest_id: &str) -> Result<usize, StoreError> {
        let n: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM track_points WHERE ingest_id = ?1",
            params![ingest_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM track_points", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn find_near(
        &self,
        lon: Degree,
        lat: Degree,
        radius_m: Meter,
        limit: usize,
    ) -> Result<Vec<TrackPoint>, StoreError> {
        if limit == 0 || radius_m.is_nan() || radius_m < 0.0 {
            return Ok(Vec::new());
        }
        let bounds = SearchBounds::around(lon, lat, radius_m);
        let ranges = bounds.lon_ranges();
        let (a_lo, a_hi) = ranges[0];
        let (b_lo, b_hi) = ranges.get(1).copied().unwrap_or(ranges[0]);

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT lat, lon, doc FROM track_points
            WHERE lat BETWEEN ?1 AND ?2
              AND (lon BETWEEN ?3 AND ?4 OR lon BETWEEN ?5 AND ?6)
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![bounds.lat_min, bounds.lat_max, a_lo, a_hi, b_lo, b_hi],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?, row.get::<_, String>(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut hits = Vec::new();
        for (p_lat, p_lon, doc) in rows {
            let d = haversine_distance(lat, lon, p_lat, p_lon);
            if d <= radius_m {
                hits.push((OrderedFloat(d), decode_point(&doc)?));
            }
        }
        hits.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.ts_utc.cmp(&b.1.ts_utc))
                .then_with(|| a.1.device_id.cmp(&b.1.device_id))
        });
        Ok(hits.into_iter().take(limit).map(|(_, p)| p).collect())
    }
}

impl JobRegistry for SqliteStore {
    fn create_job(
        &self,
        ingest_id: &str,
        source: JobSource,
        params: JobParams,
    ) -> Result<Job, StoreError> {
        let job = Job::start(ingest_id, source, params);
        let inserted = self.lock()?.execute(
            "INSERT OR IGNORE INTO ingest_jobs (ingest_id, status, doc) VALUES (?1, ?2, ?3)",
            params![job.ingest_id, job.status.as_str(), serde_json::to_string(&job)?],
        )?;
        if inserted == 0 {
            return Err(StoreError::DuplicateJob(ingest_id.to_string()));
        }
        Ok(job)
    }

    fn update_job_status(
        &self,
        ingest_id: &str,
        status: JobStatus,
        stats: Option<JobStats>,
        error_sample: Option<&ErrorIndex>,
    ) -> Result<Job, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM ingest_jobs WHERE ingest_id = ?1",
                params![ingest_id],
                |row| row.get(0),
            )
            .optional()?;
        let mut job = match doc {
            Some(doc) => decode_job(&doc)?,
            None => return Err(StoreError::JobNotFound(ingest_id.to_string())),
        };

        job.apply_update(status, stats, error_sample);
        tx.execute(
            "UPDATE ingest_jobs SET status = ?2, doc = ?3 WHERE ingest_id = ?1",
            params![ingest_id, job.status.as_str(), serde_json::to_string(&job)?],
        )?;
        tx.commit()?;
        Ok(job)
    }

    fn get_job(&self, ingest_id: &str) -> Result<Option<Job>, StoreError> {
        let doc: Option<String> = self
            .lock()?
            .query_row(
                "SELECT doc FROM ingest_jobs WHERE ingest_id = ?1",
                params![ingest_id],
                |row| row.get(0),
            )
            .optional()?;
        doc.as_deref().map(decode_job).transpose()
    }
}
