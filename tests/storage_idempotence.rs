mod common;

use std::sync::Arc;
use std::thread;

use bhulan::constants::{ErrorIndex, METERS_PER_DEGREE};
use bhulan::jobs::{JobParams, JobSource, JobStats, JobStatus};
use bhulan::mapping::vendor::create_generic_mapping;
use bhulan::normalize::normalize_record;
use bhulan::settings::Settings;
use bhulan::storage::{JobRegistry, MemoryStore, SqliteStore, StoreError, TrackPointRepository};
use bhulan::track_point::TrackPoint;
use camino::Utf8PathBuf;
use chrono::Duration;

use crate::common::{assert_sorted_by_time, generic_record, t0, track};

fn sqlite_file() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("bhulan.db")).unwrap();
    (dir, path)
}

fn check_replay_is_idempotent<S: TrackPointRepository>(store: &S) {
    let point = TrackPoint::new("T1", t0(), 1.0, 1.0);
    assert_eq!(store.upsert_batch(&[point.clone()]).unwrap(), 1);
    assert_eq!(store.upsert_batch(&[point.clone()]).unwrap(), 0);
    assert_eq!(store.count().unwrap(), 1);
    assert!(store.exists(&point.content_hash()).unwrap());

    let batch = track("T2", 50);
    assert_eq!(store.upsert_batch(&batch).unwrap(), 50);
    assert_eq!(store.upsert_batch(&batch).unwrap(), 0);
    assert_eq!(store.count().unwrap(), 51);
    assert_eq!(store.count_by_ingest_id("fixture").unwrap(), 50);
}

fn check_same_position_other_source_is_modification<S: TrackPointRepository>(store: &S) {
    let first = TrackPoint::new("T9", t0(), 5.0, 5.0).with_ingest_id("a", 0);
    let second = TrackPoint {
        src: "geotab".into(),
        ..first.clone().with_ingest_id("b", 3)
    };
    assert_eq!(first.content_hash(), second.content_hash());

    assert_eq!(store.upsert_batch(&[first]).unwrap(), 1);
    assert_eq!(store.upsert_batch(&[second]).unwrap(), 1);
    assert_eq!(store.count_by_ingest_id("a").unwrap(), 0);
    assert_eq!(store.count_by_ingest_id("b").unwrap(), 1);
}

fn check_time_window<S: TrackPointRepository>(store: &S) {
    let points = track("W1", 10);
    store.upsert_batch(&points).unwrap();
    store.upsert_batch(&track("W2", 10)).unwrap();

    let start = t0() + Duration::minutes(2);
    let end = start + Duration::minutes(6);
    let found = store.get_by_device_and_time("W1", start, end).unwrap();

    assert_eq!(found.len(), 7);
    assert_sorted_by_time(&found);
    assert!(found.iter().all(|p| p.device_id == "W1"));
    assert!(found.iter().all(|p| p.ts_utc >= start && p.ts_utc <= end));
    assert_eq!(found[0].ts_utc, start);
    assert_eq!(found[6].ts_utc, end);

    assert!(store
        .get_by_device_and_time("W1", end, start)
        .unwrap()
        .is_empty());
}

fn check_find_near<S: TrackPointRepository>(store: &S) {
    let near = TrackPoint::new("N1", t0(), 48.0, 2.0);
    let a_bit_further = TrackPoint::new("N2", t0(), 48.0 + 500.0 / METERS_PER_DEGREE, 2.0);
    let far = TrackPoint::new("N3", t0(), 49.0, 2.0);
    store
        .upsert_batch(&[far, a_bit_further, near])
        .unwrap();

    let found = store.find_near(2.0, 48.0, 1_000.0, 10).unwrap();
    assert_eq!(
        found.iter().map(|p| p.device_id.as_str()).collect::<Vec<_>>(),
        vec!["N1", "N2"]
    );
    assert_eq!(store.find_near(2.0, 48.0, 1_000.0, 1).unwrap().len(), 1);
}

fn check_job_lifecycle<S: JobRegistry>(store: &S) {
    assert!(store.get_job("nope").unwrap().is_none());
    assert!(matches!(
        store.update_job_status("nope", JobStatus::Failed, None, None),
        Err(StoreError::JobNotFound(_))
    ));

    let params = JobParams::from([("vendor".to_string(), serde_json::json!("generic"))]);
    let job = store.create_job("job-1", JobSource::File, params).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(matches!(
        store.create_job("job-1", JobSource::File, JobParams::new()),
        Err(StoreError::DuplicateJob(_))
    ));

    let errors: ErrorIndex = (0..25).map(|i| (i * 2, format!("error {i}"))).collect();
    let stats = JobStats {
        read: 100,
        accepted: 75,
        rejected: 25,
    };
    store
        .update_job_status("job-1", JobStatus::Partial, Some(stats), Some(&errors))
        .unwrap();

    let job = store.get_job("job-1").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Partial);
    assert_eq!(job.stats, stats);
    assert!(job.finished_at.is_some());
    assert_eq!(job.params["vendor"], "generic");
    assert_eq!(
        job.error_sample.keys().copied().collect::<Vec<_>>(),
        (0..10).map(|i| i * 2).collect::<Vec<_>>()
    );

    // Stats and sample are kept when an update omits them.
    store
        .update_job_status("job-1", JobStatus::Failed, None, None)
        .unwrap();
    let job = store.get_job("job-1").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.stats, stats);
    assert_eq!(job.error_sample.len(), 10);
}

#[test]
fn memory_store_contract() {
    check_replay_is_idempotent(&MemoryStore::new());
    check_same_position_other_source_is_modification(&MemoryStore::new());
    check_time_window(&MemoryStore::new());
    check_find_near(&MemoryStore::new());
    check_job_lifecycle(&MemoryStore::new());
}

#[test]
fn sqlite_store_contract() {
    check_replay_is_idempotent(&SqliteStore::open_in_memory().unwrap());
    check_same_position_other_source_is_modification(&SqliteStore::open_in_memory().unwrap());
    check_time_window(&SqliteStore::open_in_memory().unwrap());
    check_find_near(&SqliteStore::open_in_memory().unwrap());
    check_job_lifecycle(&SqliteStore::open_in_memory().unwrap());
}

#[test]
fn sqlite_file_survives_reopen() {
    let (_dir, path) = sqlite_file();
    let settings = Settings::builder().db_path(path.clone()).build().unwrap();
    {
        let store =
            SqliteStore::open_with_timeout(&settings.db_path, settings.store_busy_timeout())
                .unwrap();
        store.upsert_batch(&track("R1", 5)).unwrap();
        store
            .create_job("persisted", JobSource::Queue, JobParams::new())
            .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    store.create_indexes().unwrap();
    assert_eq!(store.count().unwrap(), 5);
    assert_eq!(store.upsert_batch(&track("R1", 5)).unwrap(), 0);
    assert_eq!(
        store.get_job("persisted").unwrap().unwrap().source,
        JobSource::Queue
    );
}

#[test]
fn stored_raw_payload_reads_back_unchanged() {
    let mut record = generic_record("P1", 0, 12.5, -3.25);
    record.insert("hdop".into(), 14.0.into());
    record.insert(
        "extra".into(),
        serde_json::json!({"fw": "1.2", "sats": [7, 9]}).into(),
    );
    let point = normalize_record(&record, &create_generic_mapping(), "raw", 0).unwrap();
    assert!(point.raw.quality_flags().is_some());

    let sqlite = SqliteStore::open_in_memory().unwrap();
    let memory = MemoryStore::new();
    let stores: [&dyn TrackPointRepository; 2] = [&sqlite, &memory];
    for store in stores {
        store.upsert_batch(&[point.clone()]).unwrap();
        let found = store.get_by_device_and_time("P1", t0(), t0()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].raw.original, record);
        assert_eq!(found[0], point);
    }
}

#[test]
fn concurrent_overlapping_ingestion_converges() {
    let (_dir, path) = sqlite_file();
    let stores: Vec<Arc<dyn TrackPointRepository>> = vec![
        Arc::new(MemoryStore::new()),
        Arc::new(SqliteStore::open(&path).unwrap()),
    ];

    for store in stores {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    // Every worker writes the same 40 points, in a different order.
                    let mut points = track("C1", 40);
                    points.rotate_left(worker * 10);
                    store.upsert_batch(&points).unwrap()
                })
            })
            .collect();
        let written: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(store.count().unwrap(), 40);
        assert!(written >= 40);
    }
}
