//! In-process document store.
//!
//! Points are kept as [`PointDocument`]s in a hash-keyed collection, next to three secondary
//! indexes maintained on every write:
//!
//! * an ordered `(device_id, ts_utc, hash)` set serving time-range queries,
//! * `ingest_id → {hash}`,
//! * a regular lat/lon grid (`1 / GEO_CELLS_PER_DEGREE` degree cells) serving [`find_near`].
//!
//! All collections sit behind one `RwLock`, so the store is `Send + Sync` and can be shared
//! between ingestion threads through an `Arc`.
//!
//! [`find_near`]: TrackPointRepository::find_near
use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::constants::{
    Degree, ErrorIndex, FastHashMap, FastHashSet, Meter, GEO_CELLS_PER_DEGREE,
};
use crate::jobs::{Job, JobParams, JobSource, JobStats, JobStatus};
use crate::smoothing::geodesy::{haversine_distance, SearchBounds};
use crate::storage::{JobRegistry, StoreError, TrackPointRepository};
use crate::track_point::{PointDocument, TrackPoint};

type GeoCell = (i32, i32);
type DeviceTimeKey = (String, DateTime<Utc>, String);

#[derive(Debug, Default)]
struct Collections {
    points: FastHashMap<String, PointDocument>,
    by_device_time: BTreeSet<DeviceTimeKey>,
    by_ingest: FastHashMap<String, FastHashSet<String>>,
    by_cell: FastHashMap<GeoCell, FastHashSet<String>>,
    jobs: FastHashMap<String, Job>,
}

impl Collections {
    fn index(&mut self, doc: &PointDocument) {
        let p = &doc.point;
        self.by_device_time
            .insert((p.device_id.clone(), p.ts_utc, doc.hash.clone()));
        self.by_ingest
            .entry(p.ingest_id.clone())
            .or_default()
            .insert(doc.hash.clone());
        self.by_cell
            .entry(geo_cell(p.lat, p.lon))
            .or_default()
            .insert(doc.hash.clone());
    }

    fn unindex(&mut self, doc: &PointDocument) {
        let p = &doc.point;
        self.by_device_time
            .remove(&(p.device_id.clone(), p.ts_utc, doc.hash.clone()));
        remove_from_bucket(&mut self.by_ingest, &p.ingest_id, &doc.hash);
        remove_from_bucket(&mut self.by_cell, &geo_cell(p.lat, p.lon), &doc.hash);
    }

    /// Returns `true` when the document was inserted or changed.
    fn upsert(&mut self, doc: PointDocument) -> bool {
        match self.points.get(&doc.hash) {
            Some(stored) if *stored == doc => false,
            Some(stored) => {
                let stored = stored.clone();
                self.unindex(&stored);
                self.index(&doc);
                self.points.insert(doc.hash.clone(), doc);
                true
            }
            None => {
                self.index(&doc);
                self.points.insert(doc.hash.clone(), doc);
                true
            }
        }
    }
}

fn remove_from_bucket<K>(index: &mut FastHashMap<K, FastHashSet<String>>, key: &K, hash: &str)
where
    K: std::hash::Hash + Eq,
{
    if let Some(bucket) = index.get_mut(key) {
        bucket.remove(hash);
        if bucket.is_empty() {
            index.remove(key);
        }
    }
}

const HALF_LON_CELLS: i32 = (180.0 * GEO_CELLS_PER_DEGREE) as i32;
const LON_CELLS: i32 = 2 * HALF_LON_CELLS;

fn wrap_lon_cell(cell: i32) -> i32 {
    (cell + HALF_LON_CELLS).rem_euclid(LON_CELLS) - HALF_LON_CELLS
}

fn geo_cell(lat: Degree, lon: Degree) -> GeoCell {
    (
        (lat * GEO_CELLS_PER_DEGREE).floor() as i32,
        wrap_lon_cell((lon * GEO_CELLS_PER_DEGREE).floor() as i32),
    )
}

/// Conservative set of grid cells that may hold a point within a search radius.
#[derive(Debug, Clone, Copy)]
struct CellWindow {
    lat_lo: i32,
    lat_hi: i32,
    /// Unwrapped longitude cell bounds, `None` when every longitude must be searched.
    lon: Option<(i32, i32)>,
}

impl CellWindow {
    fn around(lon: Degree, lat: Degree, radius_m: Meter) -> Self {
        let bounds = SearchBounds::around(lon, lat, radius_m);
        let lon = bounds.lon.and_then(|(lon_min, lon_max)| {
            let lo = (lon_min * GEO_CELLS_PER_DEGREE).floor() as i32;
            let hi = (lon_max * GEO_CELLS_PER_DEGREE).floor() as i32;
            (hi - lo < LON_CELLS).then_some((lo, hi))
        });

        CellWindow {
            lat_lo: (bounds.lat_min * GEO_CELLS_PER_DEGREE).floor() as i32,
            lat_hi: (bounds.lat_max * GEO_CELLS_PER_DEGREE).floor() as i32,
            lon,
        }
    }

    fn contains(&self, (cell_lat, cell_lon): GeoCell) -> bool {
        if cell_lat < self.lat_lo || cell_lat > self.lat_hi {
            return false;
        }
        match self.lon {
            None => true,
            Some((lo, hi)) => (cell_lon - lo).rem_euclid(LON_CELLS) <= hi - lo,
        }
    }

    fn cell_count(&self) -> usize {
        let rows = (self.lat_hi - self.lat_lo + 1) as usize;
        let cols = match self.lon {
            None => LON_CELLS as usize,
            Some((lo, hi)) => (hi - lo + 1) as usize,
        };
        rows * cols
    }

    fn cells(&self) -> Vec<GeoCell> {
        let Some((lo, hi)) = self.lon else {
            return Vec::new();
        };
        (self.lat_lo..=self.lat_hi)
            .flat_map(|la| (lo..=hi).map(move |lo_cell| (la, wrap_lon_cell(lo_cell))))
            .collect()
    }
}

/// Thread-safe in-memory implementation of both storage traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>, StoreError> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Stored document for a content hash.
    pub fn document(&self, hash: &str) -> Result<Option<PointDocument>, StoreError> {
        Ok(self.read()?.points.get(hash).cloned())
    }
}

impl TrackPointRepository for MemoryStore {
    fn create_indexes(&self) -> Result<(), StoreError> {
        // Secondary indexes are maintained on every write.
        Ok(())
    }

    fn upsert_batch(&self, points: &[TrackPoint]) -> Result<usize, StoreError> {
        if points.is_empty() {
            return Ok(0);
        }
        let docs: Vec<PointDocument> = points.iter().map(TrackPoint::to_document).collect();

        let mut inner = self.write()?;
        let mut written = 0;
        for doc in docs {
            if inner.upsert(doc) {
                written += 1;
            }
        }
        debug!(batch = points.len(), written, "memory upsert");
        Ok(written)
    }

    fn exists(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.points.contains_key(hash))
    }

    fn get_by_device_and_time(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TrackPoint>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let lower = (device_id.to_string(), start, String::new());
        inner
            .by_device_time
            .range(lower..)
            .take_while(|(device, ts, _)| device == device_id && *ts <= end)
            .map(|(_, _, hash)| {
                inner
                    .points
                    .get(hash)
                    .map(|doc| doc.point.clone())
                    .ok_or_else(|| StoreError::Corrupted(format!("dangling index entry {hash}")))
            })
            .collect()
    }

    fn count_by_ingest_id(&self, ingest_id: &str) -> Result<usize, StoreError> {
        Ok(self.read()?.by_ingest.get(ingest_id).map_or(0, |b| b.len()))
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.points.len())
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
        let inner = self.read()?;
        let window = CellWindow::around(lon, lat, radius_m);

        let scan_window = window.lon.is_some() && window.cell_count() <= inner.by_cell.len();
        let candidates: Vec<&String> = if scan_window {
            window
                .cells()
                .iter()
                .filter_map(|cell| inner.by_cell.get(cell))
                .flatten()
                .collect()
        } else {
            inner
                .by_cell
                .iter()
                .filter(|(cell, _)| window.contains(**cell))
                .flat_map(|(_, bucket)| bucket.iter())
                .collect()
        };

        let mut hits: Vec<(OrderedFloat<f64>, &PointDocument)> = candidates
            .into_iter()
            .filter_map(|hash| inner.points.get(hash))
            .map(|doc| {
                let d = haversine_distance(lat, lon, doc.point.lat, doc.point.lon);
                (OrderedFloat(d), doc)
            })
            .filter(|(d, _)| d.0 <= radius_m)
            .collect();

        hits.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.point.ts_utc.cmp(&b.1.point.ts_utc))
                .then_with(|| a.1.hash.cmp(&b.1.hash))
        });
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(_, doc)| doc.point.clone())
            .collect())
    }
}

impl JobRegistry for MemoryStore {
    fn create_job(
        &self,
        ingest_id: &str,
        source: JobSource,
        params: JobParams,
    ) -> Result<Job, StoreError> {
        let mut inner = self.write()?;
        if inner.jobs.contains_key(ingest_id) {
            return Err(StoreError::DuplicateJob(ingest_id.to_string()));
        }
        let job = Job::start(ingest_id, source, params);
        inner.jobs.insert(ingest_id.to_string(), job.clone());
        Ok(job)
    }

    fn update_job_status(
        &self,
        ingest_id: &str,
        status: JobStatus,
        stats: Option<JobStats>,
        error_sample: Option<&ErrorIndex>,
    ) -> Result<Job, StoreError> {
        let mut inner = self.write()?;
        let job = inner
            .jobs
            .get_mut(ingest_id)
            .ok_or_else(|| StoreError::JobNotFound(ingest_id.to_string()))?;
        job.apply_update(status, stats, error_sample);
        Ok(job.clone())
    }

    fn get_job(&self, ingest_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.read()?.jobs.get(ingest_id).cloned())
    }
}
