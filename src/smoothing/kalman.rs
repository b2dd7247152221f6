//! # One-dimensional Kalman filter
//!
//! Constant-value state model over a scalar speed. For every measurement `z`:
//!
//! ```text
//! P⁻ = P + Q
//! K  = P⁻ / (P⁻ + R)
//! x  = x + K (z − x)
//! P  = (1 − K) P⁻
//! ```
//!
//! `Q` is the process variance (how fast the true speed may drift) and `R` the measurement
//! variance (how noisy a GPS speed is). Small `Q / R` gives a smooth but slow estimate.
//! The filter is causal: the output at `i` only depends on samples `0..=i`.

/// Default process variance `Q`.
pub const DEFAULT_PROCESS_VARIANCE: f64 = 1e-5;

/// Default measurement variance `R`.
pub const DEFAULT_MEASUREMENT_VARIANCE: f64 = 1e-1;

/// Error covariance a series starts from.
pub const INITIAL_ERROR_COVARIANCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilter {
    process_variance: f64,
    measurement_variance: f64,
    estimate: f64,
    error_covariance: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        KalmanFilter::new(DEFAULT_PROCESS_VARIANCE, DEFAULT_MEASUREMENT_VARIANCE)
    }
}

impl KalmanFilter {
    /// Filter with the given `Q` and `R`, starting from estimate `0.0` and error `1.0`.
    pub fn new(process_variance: f64, measurement_variance: f64) -> Self {
        KalmanFilter {
            process_variance,
            measurement_variance,
            estimate: 0.0,
            error_covariance: INITIAL_ERROR_COVARIANCE,
        }
    }

    /// Override the starting state.
    pub fn with_initial_state(mut self, estimate: f64, error_covariance: f64) -> Self {
        self.estimate = estimate;
        self.error_covariance = error_covariance;
        self
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn error_covariance(&self) -> f64 {
        self.error_covariance
    }

    /// Fold one measurement into the state and return the new estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        let predicted_error = self.error_covariance + self.process_variance;
        let gain = predicted_error / (predicted_error + self.measurement_variance);
        self.estimate += gain * (measurement - self.estimate);
        self.error_covariance = (1.0 - gain) * predicted_error;
        self.estimate
    }

    /// Filter a whole series.
    ///
    /// The state is reset first: estimate = first measurement, error covariance = 1.0. An empty
    /// series yields an empty output.
    pub fn filter_series(&mut self, measurements: &[f64]) -> Vec<f64> {
        let Some(&first) = measurements.first() else {
            return Vec::new();
        };
        self.estimate = first;
        self.error_covariance = INITIAL_ERROR_COVARIANCE;
        measurements.iter().map(|&z| self.update(z)).collect()
    }
}

#[cfg(test)]
mod kalman_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_initial_state() {
        let kf = KalmanFilter::new(1e-4, 0.5);
        assert_eq!(kf.estimate(), 0.0);
        assert_eq!(kf.error_covariance(), 1.0);
    }

    #[test]
    fn test_single_update_moves_toward_measurement() {
        let mut kf = KalmanFilter::default();
        let est = kf.update(10.0);
        assert!(est > 0.0 && est < 10.0);

        let p = 1.0 + DEFAULT_PROCESS_VARIANCE;
        let k = p / (p + DEFAULT_MEASUREMENT_VARIANCE);
        assert_relative_eq!(est, 10.0 * k, epsilon = 1e-12);
        assert_relative_eq!(kf.error_covariance(), (1.0 - k) * p, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_signal_is_preserved() {
        let mut kf = KalmanFilter::default();
        let out = kf.filter_series(&[15.0; 10]);
        assert_eq!(out.len(), 10);
        for v in out {
            assert_relative_eq!(v, 15.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_series_resets_state() {
        let mut kf = KalmanFilter::default().with_initial_state(100.0, 7.0);
        let a = kf.filter_series(&[1.0, 2.0, 3.0]);
        let b = kf.filter_series(&[1.0, 2.0, 3.0]);
        assert_eq!(a, b);
        assert_eq!(a[0], 1.0);
        assert!(kf.filter_series(&[]).is_empty());
    }

    #[test]
    fn test_error_covariance_shrinks() {
        let mut kf = KalmanFilter::default();
        kf.filter_series(&[5.0, 6.0, 4.0, 5.5, 4.5]);
        assert!(kf.error_covariance() < INITIAL_ERROR_COVARIANCE);
    }
}
