//! Savitzky-Golay smoothing of response-by-angle curves.
//!
//! The filter fits a low-order polynomial over a sliding window of samples
//! and replaces each sample with the fitted value at the window center. For
//! tuning curves the window is specified as an angular width and converted to
//! a sample count from the angular sampling density, see [`SmoothingWindow`].
use std::f64::consts::{FRAC_PI_2, TAU};

use nalgebra::{DMatrix, DVector};
use num_traits::Float;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::curve::TuningCurve;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SmoothingError {
    #[error("The window length must be an odd number, received {0}")]
    WindowLengthNotOdd(usize),
    #[error(
        "The window length must not be longer than the data, received {0} window with {1} data points"
    )]
    WindowLengthTooLong(usize, usize),
    #[error("The polynomial order term {0} must be less than the window size {1}")]
    PolynomialOrderTooLarge(usize, usize),
    #[error("Failed to solve for coefficients: {0}")]
    FailedToSolveCoefficients(&'static str),
    #[error("The angular window width must be positive and finite, received {0}")]
    InvalidAngularWidth(f64),
    #[error("The angle at index {0} is not finite, cannot establish an angular ordering")]
    NonFiniteAngle(usize),
}

/// How the filter treats the samples at either end of the sequence
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EdgeMode {
    /// Treat the sequence as circular, so the window wraps from the last sample
    /// back to the first. This is the natural choice for a full $`[0, 2\pi)`$
    /// sweep of stimulus angles.
    #[default]
    Wrap,
    /// Fit a polynomial to the first and last full windows and evaluate it at
    /// the edge samples that lack a complete window.
    Interpolate,
}

#[allow(unused)]
fn factorial(n: usize) -> usize {
    match n {
        0 => 1,
        1 => 1,
        _ => factorial(n - 1) * n,
    }
}

#[derive(Debug, Clone)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    pub fn order(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.coefficients.iter()
    }

    /// Evaluate using Horner's rule
    pub fn eval_at(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * x + c)
    }

    pub fn eval(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.eval_at(*v)).collect()
    }
}

impl AsRef<[f64]> for Polynomial {
    fn as_ref(&self) -> &[f64] {
        &self.coefficients
    }
}

/// A Savitzky-Golay smoothing filter with precomputed convolution coefficients
#[derive(Debug, Clone)]
pub struct SavitskyGolay {
    window_length: usize,
    poly_order: usize,
    edge_mode: EdgeMode,
    coefficients: Vec<f64>,
}

impl SavitskyGolay {
    pub fn new(
        window_length: usize,
        poly_order: usize,
        edge_mode: EdgeMode,
    ) -> Result<Self, SmoothingError> {
        Self::validate(window_length, poly_order)?;
        let coefficients = Self::estimate_coefficients(window_length, poly_order)?;
        Ok(Self {
            window_length,
            poly_order,
            edge_mode,
            coefficients,
        })
    }

    fn validate(window_length: usize, poly_order: usize) -> Result<(), SmoothingError> {
        if window_length % 2 == 0 {
            Err(SmoothingError::WindowLengthNotOdd(window_length))
        } else if poly_order >= window_length {
            Err(SmoothingError::PolynomialOrderTooLarge(
                poly_order,
                window_length,
            ))
        } else {
            Ok(())
        }
    }

    /// Solve the Vandermonde system for the weights that evaluate the
    /// least squares polynomial at the window center.
    fn estimate_coefficients(
        window_length: usize,
        poly_order: usize,
    ) -> Result<Vec<f64>, SmoothingError> {
        let half_length = (window_length / 2) as f64;
        let vandermonde = DMatrix::from_fn(poly_order + 1, window_length, |i, j| {
            (j as f64 - half_length).powi(i as i32)
        });

        let mut y = DVector::from_element(poly_order + 1, 0.0);
        y[0] = factorial(0) as f64;

        let svd = nalgebra::linalg::SVD::new(vandermonde, true, true);
        match svd.solve(&y, 1e-12) {
            Ok(beta) => Ok(beta.iter().copied().collect()),
            Err(err) => Err(SmoothingError::FailedToSolveCoefficients(err)),
        }
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn poly_order(&self) -> usize {
        self.poly_order
    }

    pub fn edge_mode(&self) -> EdgeMode {
        self.edge_mode
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    const fn half_length(&self) -> usize {
        self.window_length / 2
    }

    fn polyfit(&self, x: &[f64], y: &[f64]) -> Result<Polynomial, SmoothingError> {
        let nc = self.poly_order + 1;
        let nr = x.len();

        let system = DMatrix::from_fn(nr, nc, |row_i, col_j| x[row_i].powi(col_j as i32));
        let beta = DVector::from_row_slice(y);
        let decomp = nalgebra::linalg::SVD::new(system, true, true);

        match decomp.solve(&beta, 1e-18) {
            Ok(val) => Ok(Polynomial::new(val.iter().copied().collect())),
            Err(e) => Err(SmoothingError::FailedToSolveCoefficients(e)),
        }
    }

    fn fit_edge(
        &self,
        data: &[f64],
        window_start: usize,
        interp_start: usize,
        interp_stop: usize,
        out: &mut [f64],
    ) -> Result<(), SmoothingError> {
        let window_stop = window_start + self.window_length;
        let x: Vec<f64> = (0..self.window_length).map(|i| i as f64).collect();
        let poly = self.polyfit(&x, &data[window_start..window_stop])?;
        for i in interp_start..interp_stop {
            out[i] = poly.eval_at((i - window_start) as f64);
        }
        Ok(())
    }

    fn smooth_wrapped(&self, data: &[f64]) -> Vec<f64> {
        let n = data.len();
        let half = self.half_length();
        (0..n)
            .map(|i| {
                self.coefficients
                    .iter()
                    .enumerate()
                    .map(|(j, c)| c * data[(i + n + j - half) % n])
                    .sum()
            })
            .collect()
    }

    fn smooth_interpolated(&self, data: &[f64]) -> Result<Vec<f64>, SmoothingError> {
        let n = data.len();
        let half = self.half_length();
        let mut out = data.to_vec();
        for i in half..(n - half) {
            out[i] = self
                .coefficients
                .iter()
                .zip(&data[i - half..=i + half])
                .map(|(c, y)| c * y)
                .sum();
        }
        self.fit_edge(data, 0, 0, half, &mut out)?;
        self.fit_edge(data, n - self.window_length, n - half, n, &mut out)?;
        Ok(out)
    }

    /// Smooth `data`, returning a new vector of the same length
    pub fn smooth<F: Float>(&self, data: &[F]) -> Result<Vec<F>, SmoothingError> {
        let n = data.len();
        if self.window_length > n {
            return Err(SmoothingError::WindowLengthTooLong(self.window_length, n));
        }
        let values: Vec<f64> = data.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).collect();
        let smoothed = match self.edge_mode {
            EdgeMode::Wrap => self.smooth_wrapped(&values),
            EdgeMode::Interpolate => self.smooth_interpolated(&values)?,
        };
        Ok(smoothed
            .into_iter()
            .map(|v| F::from(v).unwrap_or_else(F::nan))
            .collect())
    }
}

/// Apply a Savitzky-Golay filter of `window_length` and `poly_order` to `data`
pub fn savitsky_golay<F: Float>(
    data: &[F],
    window_length: usize,
    poly_order: usize,
    edge_mode: EdgeMode,
) -> Result<Vec<F>, SmoothingError> {
    let state = SavitskyGolay::new(window_length, poly_order, edge_mode)?;
    state.smooth(data)
}

/// The smoothing window, expressed in terms of angular coverage rather than
/// sample count.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SmoothingWindow {
    /// The angular width of the window in radians
    pub angular_width: f64,
    /// The order of the local polynomial
    pub poly_order: usize,
    /// How to treat the ends of the angle-sorted sequence
    pub edge_mode: EdgeMode,
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        Self {
            angular_width: FRAC_PI_2,
            poly_order: 2,
            edge_mode: EdgeMode::Wrap,
        }
    }
}

impl SmoothingWindow {
    pub fn new(angular_width: f64, poly_order: usize, edge_mode: EdgeMode) -> Self {
        Self {
            angular_width,
            poly_order,
            edge_mode,
        }
    }

    pub fn angular_width(mut self, angular_width: f64) -> Self {
        self.angular_width = angular_width;
        self
    }

    pub fn poly_order(mut self, poly_order: usize) -> Self {
        self.poly_order = poly_order;
        self
    }

    pub fn edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    /// Convert the angular width into an odd sample count for `n_samples`
    /// spread over the full circle.
    ///
    /// The window is the odd integer nearest to $`n \cdot w / 2\pi`$, but never
    /// shorter than the smallest odd length that can support the polynomial.
    pub fn window_length(&self, n_samples: usize) -> Result<usize, SmoothingError> {
        if !(self.angular_width.is_finite() && self.angular_width > 0.0) {
            return Err(SmoothingError::InvalidAngularWidth(self.angular_width));
        }
        let coverage = self.angular_width / TAU;
        let width = n_samples as f64 * coverage;
        let nearest_odd = 2 * (width / 2.0).floor() as usize + 1;

        let min_length = (self.poly_order + 1) | 1;
        let window_length = nearest_odd.max(min_length);
        if window_length > n_samples {
            return Err(SmoothingError::WindowLengthTooLong(
                window_length,
                n_samples,
            ));
        }
        Ok(window_length)
    }

    /// Build the sample-count filter for a curve of `n_samples`
    pub fn filter_for(&self, n_samples: usize) -> Result<SavitskyGolay, SmoothingError> {
        let window_length = self.window_length(n_samples)?;
        SavitskyGolay::new(window_length, self.poly_order, self.edge_mode)
    }
}

/// Smooth a [`TuningCurve`] along its angle axis.
///
/// Samples are filtered in angle order, and the smoothed values are returned in
/// the curve's original trial order so they stay paired with the original angles.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AngularSmoother {
    pub window: SmoothingWindow,
}

impl AngularSmoother {
    pub fn new(window: SmoothingWindow) -> Self {
        Self { window }
    }

    pub fn smooth(&self, curve: &TuningCurve) -> Result<Vec<f64>, SmoothingError> {
        if let Some(i) = curve.angle.iter().position(|a| !a.is_finite()) {
            return Err(SmoothingError::NonFiniteAngle(i));
        }
        let filter = self.window.filter_for(curve.len())?;

        let order = curve.angle_order();
        let sorted: Vec<f64> = order.iter().map(|i| curve.response[*i]).collect();
        let smoothed = filter.smooth(&sorted)?;

        let mut out = vec![0.0; curve.len()];
        for (value, i) in smoothed.into_iter().zip(order) {
            out[i] = value;
        }
        Ok(out)
    }
}
