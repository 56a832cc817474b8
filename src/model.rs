//! The double von Mises tuning curve model.
//!
//! ```math
//! f(\theta) = A_0 \exp\left(\kappa_0 (\cos(\theta - \mu_0) - 1)\right) + A_1 \exp\left(\kappa_1 (\cos(\theta - \mu_1) - 1)\right)
//! ```
//!
//! Each kernel peaks at exactly its amplitude when $`\theta = \mu`$, so $`A_0`$ and $`A_1`$
//! read directly as the heights of the two lobes above zero.
use std::f64::consts::PI;

use nalgebra::Vector6;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::wrap_angle;
use crate::curve::TuningCurve;

/// The parameter names in storage order
pub const PARAMETER_NAMES: [&str; 6] = ["A0", "A1", "mu0", "mu1", "kappa0", "kappa1"];

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ParameterError {
    #[error("Parameter {0} must be finite")]
    NonFinite(&'static str),
    #[error("Parameter {0} must be non-negative, received {1}")]
    Negative(&'static str, f64),
}

/// A model of a response as a periodic function of stimulus angle
pub trait CircularModel {
    /// Compute the theoretical response at angle `theta`
    fn density(&self, theta: f64) -> f64;

    /// Given a sequence of angles, produce the complementary sequence of theoretical responses
    fn predict(&self, angles: &[f64]) -> Vec<f64> {
        angles.iter().map(|t| self.density(*t)).collect()
    }

    /// Given an angle iterator, produce the complementary iterator of theoretical responses
    fn predict_iter<I: IntoIterator<Item = f64>>(&self, angles: I) -> impl Iterator<Item = f64> {
        angles.into_iter().map(|t| self.density(t))
    }

    /// The mean squared error of the model against `curve`
    fn mse(&self, curve: &TuningCurve) -> f64 {
        if curve.is_empty() {
            return f64::NAN;
        }
        curve
            .iter()
            .map(|(t, y)| (self.density(t) - y).powi(2))
            .sum::<f64>()
            / curve.len() as f64
    }
}

#[inline]
fn von_mises_kernel(theta: f64, mu: f64, kappa: f64) -> f64 {
    (kappa * ((theta - mu).cos() - 1.0)).exp()
}

/// The parameters of a two lobed von Mises tuning curve.
///
/// Amplitudes and concentrations are non-negative, which [`DoubleVonMises::new`]
/// enforces. A failed fit is represented by [`DoubleVonMises::undefined`], whose
/// parameters are all NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "ParameterFields"))]
pub struct DoubleVonMises {
    #[cfg_attr(feature = "serde", serde(rename = "A0"))]
    a0: f64,
    #[cfg_attr(feature = "serde", serde(rename = "A1"))]
    a1: f64,
    mu0: f64,
    mu1: f64,
    kappa0: f64,
    kappa1: f64,
}

/// The per-neuron fit parameters record
pub type FitParameters = DoubleVonMises;

/// The unchecked serialized form of [`DoubleVonMises`]
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Copy, Deserialize)]
struct ParameterFields {
    #[serde(rename = "A0")]
    a0: f64,
    #[serde(rename = "A1")]
    a1: f64,
    mu0: f64,
    mu1: f64,
    kappa0: f64,
    kappa1: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<ParameterFields> for DoubleVonMises {
    type Error = ParameterError;

    fn try_from(value: ParameterFields) -> Result<Self, Self::Error> {
        let ParameterFields {
            a0,
            a1,
            mu0,
            mu1,
            kappa0,
            kappa1,
        } = value;
        if [a0, a1, mu0, mu1, kappa0, kappa1].iter().all(|v| v.is_nan()) {
            return Ok(Self::undefined());
        }
        Self::new(a0, a1, mu0, mu1, kappa0, kappa1)
    }
}

impl DoubleVonMises {
    pub fn new(
        a0: f64,
        a1: f64,
        mu0: f64,
        mu1: f64,
        kappa0: f64,
        kappa1: f64,
    ) -> Result<Self, ParameterError> {
        let values = [a0, a1, mu0, mu1, kappa0, kappa1];
        for (name, value) in PARAMETER_NAMES.into_iter().zip(values) {
            if !value.is_finite() {
                return Err(ParameterError::NonFinite(name));
            }
        }
        for (name, value) in [("A0", a0), ("A1", a1), ("kappa0", kappa0), ("kappa1", kappa1)] {
            if value < 0.0 {
                return Err(ParameterError::Negative(name, value));
            }
        }
        Ok(Self {
            a0,
            a1,
            mu0,
            mu1,
            kappa0,
            kappa1,
        })
    }

    /// The sentinel for a neuron whose parameters could not be estimated
    pub const fn undefined() -> Self {
        Self {
            a0: f64::NAN,
            a1: f64::NAN,
            mu0: f64::NAN,
            mu1: f64::NAN,
            kappa0: f64::NAN,
            kappa1: f64::NAN,
        }
    }

    /// Whether every parameter holds a finite value
    pub fn is_defined(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    pub fn a0(&self) -> f64 {
        self.a0
    }

    pub fn a1(&self) -> f64 {
        self.a1
    }

    pub fn mu0(&self) -> f64 {
        self.mu0
    }

    pub fn mu1(&self) -> f64 {
        self.mu1
    }

    pub fn kappa0(&self) -> f64 {
        self.kappa0
    }

    pub fn kappa1(&self) -> f64 {
        self.kappa1
    }

    /// The same lobe amplitudes and angles with new concentrations
    pub fn with_concentrations(&self, kappa0: f64, kappa1: f64) -> Result<Self, ParameterError> {
        Self::new(self.a0, self.a1, self.mu0, self.mu1, kappa0, kappa1)
    }

    /// The parameters in storage order, see [`PARAMETER_NAMES`]
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.a0,
            self.a1,
            self.mu0,
            self.mu1,
            self.kappa0,
            self.kappa1,
        ]
    }

    pub(crate) fn to_vector(self) -> Vector6<f64> {
        Vector6::from(self.as_array())
    }

    /// Build from an optimizer state, clamping amplitudes and concentrations
    /// onto the feasible region.
    pub(crate) fn from_vector_projected(v: &Vector6<f64>) -> Self {
        Self {
            a0: v[0].max(0.0),
            a1: v[1].max(0.0),
            mu0: v[2],
            mu1: v[3],
            kappa0: v[4].max(0.0),
            kappa1: v[5].max(0.0),
        }
    }

    /// The same curve with both preferred angles mapped onto $`[0, 2\pi)`$
    pub fn wrapped(&self) -> Self {
        Self {
            mu0: wrap_angle(self.mu0),
            mu1: wrap_angle(self.mu1),
            ..*self
        }
    }

    /// The same curve with wrapped angles and the larger lobe as component 0
    pub fn canonical(&self) -> Self {
        let w = self.wrapped();
        if w.a1 > w.a0 {
            Self {
                a0: w.a1,
                a1: w.a0,
                mu0: w.mu1,
                mu1: w.mu0,
                kappa0: w.kappa1,
                kappa1: w.kappa0,
            }
        } else {
            w
        }
    }

    /// The angular separation between the two lobes, in $`[0, \pi]`$
    pub fn peak_separation(&self) -> f64 {
        let d = wrap_angle(self.mu1 - self.mu0);
        if d > PI {
            2.0 * PI - d
        } else {
            d
        }
    }

    pub fn density(&self, theta: f64) -> f64 {
        self.a0 * von_mises_kernel(theta, self.mu0, self.kappa0)
            + self.a1 * von_mises_kernel(theta, self.mu1, self.kappa1)
    }

    /// The partial derivatives of [`DoubleVonMises::density`] at `theta` with
    /// respect to each parameter, in storage order.
    pub fn jacobian(&self, theta: f64) -> Vector6<f64> {
        let d0 = theta - self.mu0;
        let (s0, c0) = d0.sin_cos();
        let e0 = (self.kappa0 * (c0 - 1.0)).exp();

        let d1 = theta - self.mu1;
        let (s1, c1) = d1.sin_cos();
        let e1 = (self.kappa1 * (c1 - 1.0)).exp();

        Vector6::new(
            e0,
            e1,
            self.a0 * e0 * self.kappa0 * s0,
            self.a1 * e1 * self.kappa1 * s1,
            self.a0 * e0 * (c0 - 1.0),
            self.a1 * e1 * (c1 - 1.0),
        )
    }
}

impl Default for DoubleVonMises {
    fn default() -> Self {
        Self::undefined()
    }
}

impl CircularModel for DoubleVonMises {
    fn density(&self, theta: f64) -> f64 {
        self.density(theta)
    }
}

#[cfg(test)]
mod test {
    use std::f64::consts::TAU;

    use super::*;
    use crate::arrayops::angle_grid;

    fn model() -> DoubleVonMises {
        DoubleVonMises::new(2.0, 0.75, 1.2, 1.2 + PI, 3.0, 1.5).unwrap()
    }

    #[rstest::rstest]
    #[case(DoubleVonMises::new(2.0, 0.75, 1.2, 1.2 + PI, 3.0, 1.5).unwrap())]
    #[case(DoubleVonMises::new(0.0, 5.0, -7.0, 40.0, 0.0, 25.0).unwrap())]
    #[case(DoubleVonMises::new(1.0, 1.0, 0.0, 0.0, 0.0, 0.0).unwrap())]
    fn test_periodic(#[case] model: DoubleVonMises) {
        for i in -20..20 {
            let theta = i as f64 * 0.37;
            let a = model.density(theta);
            let b = model.density(theta + TAU);
            let c = model.density(theta - 3.0 * TAU);
            assert!((a - b).abs() < 1e-9 * a.abs().max(1.0), "{a} != {b} at {theta}");
            assert!((a - c).abs() < 1e-9 * a.abs().max(1.0), "{a} != {c} at {theta}");
        }
    }

    #[test]
    fn test_peaks_at_amplitude() {
        let model = DoubleVonMises::new(2.0, 0.75, 1.2, 1.2 + PI, 30.0, 30.0).unwrap();
        assert!((model.density(1.2) - 2.0).abs() < 1e-9);
        assert!((model.density(1.2 + PI) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_zero_kappa_is_uniform() {
        let model = DoubleVonMises::new(0.4, 0.6, 0.3, 2.0, 0.0, 0.0).unwrap();
        for theta in angle_grid(16) {
            assert!((model.density(theta) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bounds_enforced() {
        assert_eq!(
            DoubleVonMises::new(-1.0, 0.0, 0.0, 0.0, 1.0, 1.0),
            Err(ParameterError::Negative("A0", -1.0))
        );
        assert_eq!(
            DoubleVonMises::new(1.0, 0.0, 0.0, 0.0, 1.0, -0.5),
            Err(ParameterError::Negative("kappa1", -0.5))
        );
        assert_eq!(
            DoubleVonMises::new(1.0, 0.0, f64::NAN, 0.0, 1.0, 1.0),
            Err(ParameterError::NonFinite("mu0"))
        );
        assert!(!DoubleVonMises::undefined().is_defined());
        assert!(model().is_defined());
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let model = model();
        let h = 1e-6;
        for theta in angle_grid(12) {
            let analytic = model.jacobian(theta);
            let base = model.to_vector();
            for k in 0..6 {
                let mut up = base;
                let mut down = base;
                up[k] += h;
                down[k] -= h;
                let numeric = (DoubleVonMises::from_vector_projected(&up).density(theta)
                    - DoubleVonMises::from_vector_projected(&down).density(theta))
                    / (2.0 * h);
                assert!(
                    (numeric - analytic[k]).abs() < 1e-5,
                    "d/d{} at {theta}: {numeric} vs {}",
                    PARAMETER_NAMES[k],
                    analytic[k]
                );
            }
        }
    }

    #[test]
    fn test_canonical_orders_lobes() {
        let model = DoubleVonMises::new(0.5, 2.0, -0.5, 7.0, 1.0, 4.0).unwrap();
        let canon = model.canonical();
        assert_eq!(canon.a0(), 2.0);
        assert_eq!(canon.kappa0(), 4.0);
        assert!((canon.mu0() - (7.0 - TAU)).abs() < 1e-12);
        assert!((canon.mu1() - (TAU - 0.5)).abs() < 1e-12);
        for theta in angle_grid(10) {
            assert!((canon.density(theta) - model.density(theta)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_with_concentrations() {
        let model = model().with_concentrations(8.0, 1.0).unwrap();
        assert_eq!(model.as_array(), [2.0, 0.75, 1.2, 1.2 + PI, 8.0, 1.0]);
        assert!(model.with_concentrations(-1.0, 1.0).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_validates() {
        let value = serde_json::to_string(&model()).unwrap();
        let back: DoubleVonMises = serde_json::from_str(&value).unwrap();
        for (a, b) in back.as_array().into_iter().zip(model().as_array()) {
            assert!((a - b).abs() < 1e-12, "{a} != {b}");
        }

        let negative = r#"{"A0": -1.0, "A1": 0.5, "mu0": 0.0, "mu1": 3.0, "kappa0": 1.0, "kappa1": 1.0}"#;
        let err = serde_json::from_str::<DoubleVonMises>(negative).unwrap_err();
        assert!(err.to_string().contains("A0"), "{err}");
    }

    #[test]
    fn test_mse_zero_on_exact_data() {
        let model = model();
        let angles = angle_grid(36);
        let response = model.predict(&angles);
        let curve = TuningCurve::from((angles, response));
        assert_eq!(model.mse(&curve), 0.0);
    }
}
