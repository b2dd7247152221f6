#![allow(dead_code)]

use bhulan::record::{record_from_json, RawRecord};
use bhulan::track_point::TrackPoint;
use camino::Utf8PathBuf;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde_json::json;

/// 2024-05-01T12:00:00Z, the reference instant of the fixtures.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn data_path(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Generic-vendor record, `minute` minutes after [`t0`].
pub fn generic_record(device_id: &str, minute: i64, lat: f64, lon: f64) -> RawRecord {
    record_from_json(json!({
        "device_id": device_id,
        "timestamp": (t0() + Duration::minutes(minute)).to_rfc3339(),
        "lat": lat,
        "lon": lon,
        "speed": 12.5,
    }))
    .unwrap()
}

/// `n` generic records of device `T1`; the ones at `bad` carry an out-of-range latitude.
pub fn batch_with_rejects(n: usize, bad: &[usize]) -> Vec<RawRecord> {
    (0..n)
        .map(|i| {
            let lat = if bad.contains(&i) { 91.0 } else { 37.0 + i as f64 * 1e-3 };
            generic_record("T1", i as i64, lat, -122.4194)
        })
        .collect()
}

/// `n` points of one device, one minute apart, heading north.
pub fn track(device_id: &str, n: usize) -> Vec<TrackPoint> {
    (0..n)
        .map(|i| {
            TrackPoint::new(
                device_id,
                t0() + Duration::minutes(i as i64),
                10.0 + i as f64 * 1e-3,
                20.0,
            )
            .with_speed(15.0)
            .with_ingest_id("fixture", i)
        })
        .collect()
}

/// Constant `level` plus seeded Gaussian noise.
pub fn noisy_speeds(n: usize, level: f64, sigma: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).unwrap();
    (0..n).map(|_| level + normal.sample(&mut rng)).collect()
}

pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

pub fn assert_sorted_by_time(points: &[TrackPoint]) {
    assert!(
        points.windows(2).all(|w| w[0].ts_utc <= w[1].ts_utc),
        "points are not sorted by ts_utc"
    );
}
