//! # Speed smoothing
//!
//! GPS speeds are noisy: receivers report quantized Doppler speeds, and speeds derived from
//! consecutive fixes amplify position jitter. This module provides two interchangeable
//! smoothers behind one configuration object:
//!
//! * [`SmoothingMethod::Kalman`] – causal 1-D Kalman filter ([`kalman::KalmanFilter`]),
//! * [`SmoothingMethod::Savgol`] – Savitzky–Golay local polynomial fit
//!   ([`savgol::savitzky_golay_filter`]),
//! * [`SmoothingMethod::None`] – identity, still reporting the input speed for diagnostics.
//!
//! ## Missing speeds
//! -----------------
//! [`SpeedSmoother::smooth`] works on [`TrackPoint`]s. A point without `speed_mps` gets the
//! speed implied by the great-circle distance to its predecessor divided by the elapsed time
//! ([`geodesy::speed_between`]) when `compute_missing` is set, and `0.0` otherwise. The
//! first point never has a predecessor and falls back to `0.0`.
//!
//! ## Example
//! -----------------
//! ```rust,no_run
//! use bhulan::smoothing::{SmootherConfig, SmoothingMethod, SpeedSmoother};
//!
//! let config = SmootherConfig::builder()
//!     .method(SmoothingMethod::Savgol)
//!     .savgol_window_length(7)
//!     .build()
//!     .unwrap();
//! let smoother = SpeedSmoother::new(config);
//! let smoothed = smoother.smooth_speed_series(&[10.0, 12.0, 9.0, 11.0, 30.0, 10.0, 11.0]).unwrap();
//! ```
pub mod geodesy;
pub mod kalman;
pub mod savgol;

use std::cmp::Ordering::Greater;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::constants::MetersPerSecond;
use crate::settings::Settings;
use crate::smoothing::geodesy::speed_between;
use crate::smoothing::kalman::{
    KalmanFilter, DEFAULT_MEASUREMENT_VARIANCE, DEFAULT_PROCESS_VARIANCE,
};
use crate::smoothing::savgol::{savitzky_golay_filter, DEFAULT_POLYORDER, DEFAULT_WINDOW_LENGTH};
use crate::track_point::TrackPoint;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmoothingError {
    #[error("Invalid smoother parameter: {0}")]
    InvalidSmootherParameter(String),

    #[error("Unknown smoothing method: {0}")]
    UnknownMethod(String),

    #[error("Savitzky-Golay normal equations are singular (window {window}, polyorder {polyorder})")]
    SingularFit { window: usize, polyorder: usize },
}

/// Smoothing algorithm selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMethod {
    #[default]
    Kalman,
    Savgol,
    None,
}

impl SmoothingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SmoothingMethod::Kalman => "kalman",
            SmoothingMethod::Savgol => "savgol",
            SmoothingMethod::None => "none",
        }
    }
}

impl fmt::Display for SmoothingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmoothingMethod {
    type Err = SmoothingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kalman" => Ok(SmoothingMethod::Kalman),
            "savgol" => Ok(SmoothingMethod::Savgol),
            "none" => Ok(SmoothingMethod::None),
            _ => Err(SmoothingError::UnknownMethod(s.to_string())),
        }
    }
}

/// Tuning of a [`SpeedSmoother`].
///
/// Fields
/// -----------------
/// * `method`: algorithm to run.
/// * `kalman_process_variance`: Kalman `Q`, must be > 0.
/// * `kalman_measurement_variance`: Kalman `R`, must be > 0.
/// * `savgol_window_length`: requested Savitzky–Golay window, must be ≥ 1 (adjusted to an odd
///   value larger than `savgol_polyorder` at filtering time).
/// * `savgol_polyorder`: Savitzky–Golay polynomial degree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    pub method: SmoothingMethod,
    pub kalman_process_variance: f64,
    pub kalman_measurement_variance: f64,
    pub savgol_window_length: usize,
    pub savgol_polyorder: usize,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        SmootherConfig {
            method: SmoothingMethod::Kalman,
            kalman_process_variance: DEFAULT_PROCESS_VARIANCE,
            kalman_measurement_variance: DEFAULT_MEASUREMENT_VARIANCE,
            savgol_window_length: DEFAULT_WINDOW_LENGTH,
            savgol_polyorder: DEFAULT_POLYORDER,
        }
    }
}

impl SmootherConfig {
    pub fn builder() -> SmootherConfigBuilder {
        SmootherConfigBuilder {
            config: SmootherConfig::default(),
        }
    }

    /// Check the invariants enforced by [`SmootherConfigBuilder::build`].
    pub fn validate(&self) -> Result<(), SmoothingError> {
        if !gt0(self.kalman_process_variance) {
            return Err(SmoothingError::InvalidSmootherParameter(
                "kalman_process_variance must be > 0".into(),
            ));
        }
        if !gt0(self.kalman_measurement_variance) {
            return Err(SmoothingError::InvalidSmootherParameter(
                "kalman_measurement_variance must be > 0".into(),
            ));
        }
        if self.savgol_window_length == 0 {
            return Err(SmoothingError::InvalidSmootherParameter(
                "savgol_window_length must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Return true iff x > 0.0 and comparable (i.e., not NaN).
#[inline]
fn gt0(x: f64) -> bool {
    x.partial_cmp(&0.0) == Some(Greater)
}

#[derive(Debug, Clone)]
pub struct SmootherConfigBuilder {
    config: SmootherConfig,
}

impl SmootherConfigBuilder {
    pub fn method(mut self, v: SmoothingMethod) -> Self {
        self.config.method = v;
        self
    }
    pub fn kalman_process_variance(mut self, v: f64) -> Self {
        self.config.kalman_process_variance = v;
        self
    }
    pub fn kalman_measurement_variance(mut self, v: f64) -> Self {
        self.config.kalman_measurement_variance = v;
        self
    }
    pub fn savgol_window_length(mut self, v: usize) -> Self {
        self.config.savgol_window_length = v;
        self
    }
    pub fn savgol_polyorder(mut self, v: usize) -> Self {
        self.config.savgol_polyorder = v;
        self
    }

    /// Validate and produce the configuration.
    ///
    /// Validation rules
    /// -----------------
    /// * `kalman_process_variance > 0`, `kalman_measurement_variance > 0` (NaN rejected).
    /// * `savgol_window_length ≥ 1`.
    pub fn build(self) -> Result<SmootherConfig, SmoothingError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A track point after smoothing: `point.speed_mps` holds the smoothed speed and
/// `speed_mps_original` the value fed to the smoother (reported or derived).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedPoint {
    #[serde(flatten)]
    pub point: TrackPoint,
    pub speed_mps_original: MetersPerSecond,
}

/// Stateless entry point; every call runs a fresh filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedSmoother {
    config: SmootherConfig,
}

impl SpeedSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        SpeedSmoother { config }
    }

    /// Smoother configured by [`Settings::smoother`].
    pub fn from_settings(settings: &Settings) -> Self {
        SpeedSmoother::new(settings.smoother.clone())
    }

    /// Smoother for a method tag (`"kalman"`, `"savgol"`, `"none"`, any case) with default tuning.
    pub fn for_method(method: &str) -> Result<Self, SmoothingError> {
        let config = SmootherConfig {
            method: method.parse()?,
            ..SmootherConfig::default()
        };
        Ok(SpeedSmoother::new(config))
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    pub fn method(&self) -> SmoothingMethod {
        self.config.method
    }

    /// Smooth a bare speed series.
    ///
    /// Return
    /// ------
    /// * a series of the same length. `None` returns the input unchanged.
    pub fn smooth_speed_series(
        &self,
        speeds: &[MetersPerSecond],
    ) -> Result<Vec<MetersPerSecond>, SmoothingError> {
        if speeds.is_empty() {
            return Ok(Vec::new());
        }
        let c = &self.config;
        match c.method {
            SmoothingMethod::Kalman => Ok(KalmanFilter::new(
                c.kalman_process_variance,
                c.kalman_measurement_variance,
            )
            .filter_series(speeds)),
            SmoothingMethod::Savgol => {
                savitzky_golay_filter(speeds, c.savgol_window_length, c.savgol_polyorder)
            }
            SmoothingMethod::None => Ok(speeds.to_vec()),
        }
    }

    /// Input speed of every point: reported speed, else derived (or `0.0`).
    pub fn input_speeds(points: &[TrackPoint], compute_missing: bool) -> Vec<MetersPerSecond> {
        points
            .iter()
            .enumerate()
            .map(|(i, point)| match point.speed_mps {
                Some(speed) => speed,
                None if compute_missing && i > 0 => speed_between(&points[i - 1], point),
                None => 0.0,
            })
            .collect()
    }

    /// Smooth the speed track of a time-ordered point sequence.
    ///
    /// Arguments
    /// ---------
    /// * `points`: the points of one device, sorted by `ts_utc`
    /// * `compute_missing`: derive absent speeds from consecutive coordinates
    ///
    /// Return
    /// ------
    /// * one [`SmoothedPoint`] per input point, in input order
    pub fn smooth(
        &self,
        points: &[TrackPoint],
        compute_missing: bool,
    ) -> Result<Vec<SmoothedPoint>, SmoothingError> {
        let speeds = Self::input_speeds(points, compute_missing);
        let smoothed = self.smooth_speed_series(&speeds)?;
        debug!(
            method = %self.config.method,
            points = points.len(),
            derived = points.iter().filter(|p| p.speed_mps.is_none()).count(),
            "smoothed speed track"
        );

        Ok(points
            .iter()
            .zip(speeds)
            .zip(smoothed)
            .map(|((point, original), speed)| SmoothedPoint {
                point: TrackPoint {
                    speed_mps: Some(speed),
                    ..point.clone()
                },
                speed_mps_original: original,
            })
            .collect())
    }
}

impl From<&Settings> for SpeedSmoother {
    fn from(settings: &Settings) -> Self {
        SpeedSmoother::from_settings(settings)
    }
}
