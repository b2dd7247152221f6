//! # Constants and type definitions for bhulan
//!
//! This module centralizes the **physical constants**, **unit conversion factors**,
//! **validation thresholds** and **common type aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Geodesy (mean Earth radius used by the haversine distance)
//! - Speed and altitude conversion factors toward SI units
//! - Acceptance thresholds applied by the validator/repairer
//! - Job registry limits
//! - Type aliases documenting the unit carried by an `f64`

// -------------------------------------------------------------------------------------------------
// Geodesy
// -------------------------------------------------------------------------------------------------

/// Mean Earth radius in meters (spherical model used by the haversine formula)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude on the spherical model
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

// -------------------------------------------------------------------------------------------------
// Unit conversions (value in unit × factor = SI value)
// -------------------------------------------------------------------------------------------------

/// Meters per second → meters per second
pub const MPS_PER_MPS: f64 = 1.0;

/// Kilometers per hour → meters per second
pub const MPS_PER_KPH: f64 = 1.0 / 3.6;

/// Miles per hour → meters per second
pub const MPS_PER_MPH: f64 = 0.44704;

/// Knots → meters per second
pub const MPS_PER_KNOT: f64 = 0.514444;

/// Meters → meters
pub const M_PER_M: f64 = 1.0;

/// Feet → meters
pub const M_PER_FT: f64 = 0.3048;

/// Kilometers → meters
pub const M_PER_KM: f64 = 1000.0;

// -------------------------------------------------------------------------------------------------
// Validation thresholds
// -------------------------------------------------------------------------------------------------

/// Highest plausible ground speed (432 km/h)
pub const MAX_SPEED_MPS: f64 = 120.0;

/// HDOP above this value is kept but flagged as low confidence
pub const MAX_TRUSTED_HDOP: f64 = 10.0;

/// How far in the future a timestamp may lie before it is rejected
pub const MAX_FUTURE_SKEW_DAYS: i64 = 2;

/// Numeric epochs strictly above this value are read as milliseconds
pub const EPOCH_MILLIS_THRESHOLD: f64 = 1e10;

// -------------------------------------------------------------------------------------------------
// Job registry
// -------------------------------------------------------------------------------------------------

/// Maximum number of error entries kept on a job document
pub const ERROR_SAMPLE_CAP: usize = 10;

/// Precision (decimal places) of coordinates inside the content hash key
pub const HASH_COORD_DECIMALS: usize = 6;

// -------------------------------------------------------------------------------------------------
// Storage
// -------------------------------------------------------------------------------------------------

/// Grid cells per degree of the in-memory geospatial index (0.1° cells)
pub const GEO_CELLS_PER_DEGREE: f64 = 10.0;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Distance in meters
pub type Meter = f64;
/// Speed in meters per second
pub type MetersPerSecond = f64;
/// Sparse map from batch index to error message
pub type ErrorIndex = std::collections::BTreeMap<usize, String>;
/// Hash map using the aHash hasher
pub type FastHashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
/// Hash set using the aHash hasher
pub type FastHashSet<K> = std::collections::HashSet<K, ahash::RandomState>;
