//! # Savitzky–Golay smoothing
//!
//! Local least-squares polynomial smoothing. Within a window of `w = 2m + 1` samples, a
//! polynomial of degree `p` is fitted and evaluated back at the sample positions. With the
//! Vandermonde matrix `A` (`A[i][k] = xᵢᵏ`, `xᵢ = i − m`), the fitted values of a window `y` are
//! `H·y` where
//!
//! ```text
//! H = A (AᵀA)⁻¹ Aᵀ        (w × w "hat" matrix)
//! ```
//!
//! * interior sample `i` is row `m` of `H` applied to `y[i−m ..= i+m]`,
//! * the first `m` samples are rows `0..m` applied to the first window,
//! * the last `m` samples are rows `m+1..w` applied to the last window.
//!
//! The edge treatment fits one polynomial over each boundary window instead of padding, which
//! keeps linear (for `p ≥ 1`) and quadratic (for `p ≥ 2`) trends intact up to the ends.
use nalgebra::{DMatrix, DVector};

use crate::smoothing::SmoothingError;

/// Default window length.
pub const DEFAULT_WINDOW_LENGTH: usize = 5;

/// Default polynomial order.
pub const DEFAULT_POLYORDER: usize = 2;

/// Effective window for a requested `(window_length, polyorder)`.
///
/// An even window is bumped to the next odd value; a window not larger than `polyorder` is
/// raised to the smallest odd value `≥ polyorder + 2`.
pub fn effective_window(window_length: usize, polyorder: usize) -> usize {
    let mut window = window_length.max(1);
    if window % 2 == 0 {
        window += 1;
    }
    if window <= polyorder {
        window = polyorder + 2;
        if window % 2 == 0 {
            window += 1;
        }
    }
    window
}

/// Least-squares projection matrix of a centered window.
///
/// Return
/// ------
/// * the `window × window` hat matrix, or [`SmoothingError::SingularFit`] when the normal
///   equations cannot be inverted
fn hat_matrix(window: usize, polyorder: usize) -> Result<DMatrix<f64>, SmoothingError> {
    let half = (window / 2) as f64;
    let a = DMatrix::from_fn(window, polyorder + 1, |i, k| (i as f64 - half).powi(k as i32));
    let ata_inv = (a.transpose() * &a)
        .try_inverse()
        .ok_or(SmoothingError::SingularFit { window, polyorder })?;
    Ok(&a * ata_inv * a.transpose())
}

/// Smooth `speeds` with a Savitzky–Golay filter.
///
/// Arguments
/// ---------
/// * `speeds`: the series to smooth
/// * `window_length`: requested window, adjusted by [`effective_window`]
/// * `polyorder`: degree of the local polynomial
///
/// Return
/// ------
/// * the smoothed series, same length as the input. A series shorter than the effective
///   window is returned unchanged.
pub fn savitzky_golay_filter(
    speeds: &[f64],
    window_length: usize,
    polyorder: usize,
) -> Result<Vec<f64>, SmoothingError> {
    let window = effective_window(window_length, polyorder);
    let n = speeds.len();
    if n < window {
        return Ok(speeds.to_vec());
    }

    let h = hat_matrix(window, polyorder)?;
    let half = window / 2;
    let apply = |row: usize, start: usize| -> f64 {
        let y = DVector::from_column_slice(&speeds[start..start + window]);
        h.row(row).dot(&y.transpose())
    };

    let mut out = Vec::with_capacity(n);
    for i in 0..half {
        out.push(apply(i, 0));
    }
    for i in half..n - half {
        out.push(apply(half, i - half));
    }
    for row in half + 1..window {
        out.push(apply(row, n - window));
    }
    Ok(out)
}

#[cfg(test)]
mod savgol_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_effective_window() {
        assert_eq!(effective_window(5, 2), 5);
        assert_eq!(effective_window(4, 2), 5);
        assert_eq!(effective_window(3, 2), 3);
        assert_eq!(effective_window(2, 2), 3);
        assert_eq!(effective_window(3, 3), 5);
        assert_eq!(effective_window(1, 4), 7);
        assert_eq!(effective_window(0, 0), 1);
    }

    #[test]
    fn test_classic_five_point_quadratic_weights() {
        // Interior weights for (w = 5, p = 2) are (-3, 12, 17, 12, -3) / 35.
        let h = hat_matrix(5, 2).unwrap();
        let expected = [-3.0, 12.0, 17.0, 12.0, -3.0].map(|v| v / 35.0);
        for (j, e) in expected.iter().enumerate() {
            assert_relative_eq!(h[(2, j)], *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_quadratic_is_reproduced_exactly() {
        let series: Vec<f64> = (0..12).map(|i| 0.5 * (i * i) as f64 - 2.0 * i as f64 + 3.0).collect();
        let out = savitzky_golay_filter(&series, 5, 2).unwrap();
        assert_eq!(out.len(), series.len());
        for (a, b) in out.iter().zip(&series) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_short_series_returned_unchanged() {
        let series = [1.0, 5.0, 2.0, 8.0];
        assert_eq!(savitzky_golay_filter(&series, 5, 2).unwrap(), series.to_vec());
        // Window bumped from 4 to 5 before the length check.
        assert_eq!(savitzky_golay_filter(&series, 4, 2).unwrap(), series.to_vec());
        assert!(savitzky_golay_filter(&[], 5, 2).unwrap().is_empty());
    }

    #[test]
    fn test_spike_is_attenuated() {
        let mut series = vec![10.0; 15];
        series[7] = 30.0;
        let out = savitzky_golay_filter(&series, 7, 2).unwrap();
        assert!(out[7] < 25.0);
        assert!(out[7] > 10.0);
    }
}
