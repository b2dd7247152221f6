//! Great-circle distance, search bounds and coordinate-derived speed on a spherical Earth.
use chrono::{DateTime, Utc};

use crate::constants::{Degree, Meter, MetersPerSecond, EARTH_RADIUS_M, METERS_PER_DEGREE};
use crate::track_point::TrackPoint;

/// Haversine distance between two `(lat, lon)` positions, in meters.
pub fn haversine_distance(lat1: Degree, lon1: Degree, lat2: Degree, lon2: Degree) -> Meter {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Lat/lon box enclosing every position within a radius of a center.
///
/// `lon` is `None` when the circle reaches a pole or spans every longitude. Otherwise its bounds
/// are unwrapped and may leave `[-180, 180]` when the circle crosses the antimeridian; see
/// [`SearchBounds::lon_ranges`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBounds {
    pub lat_min: Degree,
    pub lat_max: Degree,
    pub lon: Option<(Degree, Degree)>,
}

impl SearchBounds {
    pub fn around(lon: Degree, lat: Degree, radius_m: Meter) -> Self {
        let dlat = radius_m / METERS_PER_DEGREE;
        let lat_min = lat - dlat;
        let lat_max = lat + dlat;

        let widest = lat_min.abs().max(lat_max.abs());
        let lon = if widest >= 90.0 {
            None
        } else {
            let dlon = dlat / widest.to_radians().cos();
            (dlon < 180.0).then_some((lon - dlon, lon + dlon))
        };

        SearchBounds {
            lat_min: lat_min.max(-90.0),
            lat_max: lat_max.min(90.0),
            lon,
        }
    }

    /// Longitude intervals inside `[-180, 180]` covering the box (one, or two across the
    /// antimeridian).
    pub fn lon_ranges(&self) -> Vec<(Degree, Degree)> {
        match self.lon {
            None => vec![(-180.0, 180.0)],
            Some((lo, hi)) if lo < -180.0 => vec![(lo + 360.0, 180.0), (-180.0, hi)],
            Some((lo, hi)) if hi > 180.0 => vec![(lo, 180.0), (-180.0, hi - 360.0)],
            Some(range) => vec![range],
        }
    }
}

/// Seconds from `from` to `to`, with sub-second precision.
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .num_microseconds()
        .map(|us| us as f64 / 1e6)
        .unwrap_or_else(|| (to - from).num_seconds() as f64)
}

/// Average speed between two points; a non-positive elapsed time yields `0.0`.
pub fn speed_between(prev: &TrackPoint, curr: &TrackPoint) -> MetersPerSecond {
    let dt = elapsed_seconds(prev.ts_utc, curr.ts_utc);
    if dt > 0.0 {
        haversine_distance(prev.lat, prev.lon, curr.lat, curr.lon) / dt
    } else {
        0.0
    }
}

/// Speed of every point from its predecessor; the first point gets `0.0`.
pub fn compute_speed_from_coordinates(points: &[TrackPoint]) -> Vec<MetersPerSecond> {
    if points.is_empty() {
        return Vec::new();
    }
    std::iter::once(0.0)
        .chain(points.windows(2).map(|pair| speed_between(&pair[0], &pair[1])))
        .collect()
}
