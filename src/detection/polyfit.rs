// src/detection/polyfit.rs
//
// Weighted least-squares polynomial fit for lane boundaries.
//
// Same residual convention as numpy's `polyfit(x, y, deg, w=w)`: the weight
// multiplies each row of the Vandermonde system, which is then solved by SVD.
// The abscissa is scaled to [-1, 1] first and the coefficients are unscaled
// afterwards; road-frame x reaches ~60 m.

use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Degree of every lane boundary fit.
pub const LANE_POLY_DEGREE: usize = 3;

/// Cubic lane boundary y(x), coefficients highest power first.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct LanePolynomial {
    pub coeffs: [f64; LANE_POLY_DEGREE + 1],
}

impl LanePolynomial {
    /// Degenerate fit, produced when no grid point passes the threshold.
    pub const ZERO: LanePolynomial = LanePolynomial {
        coeffs: [0.0; LANE_POLY_DEGREE + 1],
    };

    pub fn new(coeffs: [f64; LANE_POLY_DEGREE + 1]) -> Self {
        Self { coeffs }
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0.0)
    }

    /// Horner evaluation.
    pub fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().fold(0.0, |acc, &c| acc * x + c)
    }
}

impl Default for LanePolynomial {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for LanePolynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.coeffs;
        write!(f, "{:.4e}x³ {:+.4e}x² {:+.4e}x {:+.4e}", a, b, c, d)
    }
}

/// Fit a cubic to weighted samples `(x, y, w)`.
///
/// Rank-deficient input (fewer than four distinct x) gets the minimum-norm
/// least-squares solution, as numpy's `lstsq` does. Returns `None` only for
/// an empty or all-zero weight input.
pub fn fit_lane_polynomial(samples: &[(f64, f64, f64)]) -> Option<LanePolynomial> {
    if samples.is_empty() || samples.iter().all(|&(_, _, w)| w == 0.0) {
        return None;
    }

    let n = LANE_POLY_DEGREE + 1;
    let scale = samples
        .iter()
        .map(|&(x, _, _)| x.abs())
        .fold(0.0f64, f64::max)
        .max(f64::MIN_POSITIVE);

    // Weighted Vandermonde rows on the scaled abscissa, lowest power first
    let design = DMatrix::from_fn(samples.len(), n, |row, col| {
        let (x, _, w) = samples[row];
        w * (x / scale).powi(col as i32)
    });
    let target = DVector::from_iterator(samples.len(), samples.iter().map(|&(_, y, w)| w * y));

    let svd = design.svd(true, true);
    let rcond = samples.len() as f64 * f64::EPSILON;
    let eps = svd.singular_values.max() * rcond;
    let scaled = svd.solve(&target, eps).ok()?;

    let mut coeffs = [0.0; LANE_POLY_DEGREE + 1];
    let mut unscale = 1.0;
    for (k, c) in scaled.iter().enumerate() {
        coeffs[LANE_POLY_DEGREE - k] = c / unscale;
        unscale *= scale;
    }

    if coeffs.iter().all(|c| c.is_finite()) {
        Some(LanePolynomial::new(coeffs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{} vs {}", a, b);
    }

    #[test]
    fn test_recovers_exact_cubic() {
        let truth = LanePolynomial::new([0.002, -0.05, 0.3, 1.5]);
        let samples: Vec<_> = (0..40)
            .map(|i| {
                let x = 5.0 + i as f64;
                (x, truth.eval(x), 1.0)
            })
            .collect();

        let fit = fit_lane_polynomial(&samples).unwrap();
        for (got, want) in fit.coeffs.iter().zip(truth.coeffs.iter()) {
            assert_close(*got, *want, 1e-6);
        }
    }

    #[test]
    fn test_weights_pull_fit_toward_heavy_points() {
        // Two clusters on a horizontal line at different heights; the heavy
        // cluster should dominate the constant term.
        let mut samples = Vec::new();
        for i in 0..10 {
            samples.push((i as f64, 1.0, 0.9));
            samples.push((i as f64, 2.0, 0.1));
        }
        let fit = fit_lane_polynomial(&samples).unwrap();
        assert!(fit.eval(5.0) < 1.1, "fit leaned to light points: {}", fit);
    }

    #[test]
    fn test_single_column_fits_its_mean() {
        let samples = vec![(10.0, 1.0, 1.0), (10.0, 3.0, 1.0)];
        let fit = fit_lane_polynomial(&samples).unwrap();
        assert!(fit.coeffs.iter().all(|c| c.is_finite()));
        assert_close(fit.eval(10.0), 2.0, 1e-9);
    }

    #[test]
    fn test_two_columns_pass_through_both_means() {
        // only two distinct x: a line is determined, the cubic is not
        let samples = vec![
            (5.0, 1.0, 1.0),
            (5.0, 2.0, 1.0),
            (20.0, 4.0, 1.0),
            (20.0, 6.0, 1.0),
        ];
        let fit = fit_lane_polynomial(&samples).unwrap();
        assert_close(fit.eval(5.0), 1.5, 1e-9);
        assert_close(fit.eval(20.0), 5.0, 1e-9);
    }

    #[test]
    fn test_empty_input_has_no_fit() {
        assert!(fit_lane_polynomial(&[]).is_none());
        assert!(fit_lane_polynomial(&[(1.0, 1.0, 0.0)]).is_none());
    }

    #[test]
    fn test_zero_polynomial() {
        assert!(LanePolynomial::ZERO.is_zero());
        assert_eq!(LanePolynomial::ZERO.eval(42.0), 0.0);
        assert!(!LanePolynomial::new([0.0, 0.0, 0.0, 1.0]).is_zero());
    }
}
