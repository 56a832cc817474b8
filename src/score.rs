//! Goodness of fit against the raw, unsmoothed responses.
//!
//! Smoothing only stabilizes the optimizer. These scores always compare the
//! fitted curve to the per-trial observations so they reflect predictive accuracy.
use crate::curve::TuningCurve;
use crate::model::{CircularModel, DoubleVonMises};

/// The mean over trials of $`(\hat{y} - y)^2`$.
///
/// Returns NaN when `params` is [undefined](DoubleVonMises::undefined) or the
/// curve is empty, so failures propagate rather than producing a misleading number.
pub fn mean_squared_error(params: &DoubleVonMises, raw: &TuningCurve) -> f64 {
    if !params.is_defined() {
        return f64::NAN;
    }
    params.mse(raw)
}

/// The fraction of the raw response variance explained by the fit, $`1 - \mathrm{MSE} / \mathrm{Var}(y)`$.
///
/// NaN when the response has no variance or the fit is undefined. Negative
/// values mean the fit does worse than a flat line at the mean response.
pub fn variance_explained(params: &DoubleVonMises, raw: &TuningCurve) -> f64 {
    let variance = raw.variance();
    if !(variance > 0.0) {
        return f64::NAN;
    }
    1.0 - mean_squared_error(params, raw) / variance
}

#[cfg(test)]
mod test {
    use std::f64::consts::PI;

    use super::*;
    use crate::arrayops::angle_grid;

    #[test]
    fn test_exact_data_scores_zero() {
        let params = DoubleVonMises::new(1.0, 0.5, 0.3, 0.3 + PI, 2.0, 5.0).unwrap();
        let angles = angle_grid(24);
        let response = params.predict(&angles);
        let raw = TuningCurve::from((angles.as_slice(), response.as_slice()));
        assert_eq!(mean_squared_error(&params, &raw), 0.0);
        assert_eq!(variance_explained(&params, &raw), 1.0);
    }

    #[test]
    fn test_known_error() {
        let params = DoubleVonMises::new(1.0, 1.0, 0.0, PI, 0.0, 0.0).unwrap();
        // Flat prediction of 2.0
        let raw = TuningCurve::from((angle_grid(4), vec![1.0, 3.0, 2.0, 2.0]));
        assert!((mean_squared_error(&params, &raw) - 0.5).abs() < 1e-12);
        assert!((variance_explained(&params, &raw) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_propagates() {
        let raw = TuningCurve::from((angle_grid(4), vec![1.0, 3.0, 2.0, 2.0]));
        assert!(mean_squared_error(&DoubleVonMises::undefined(), &raw).is_nan());
        assert!(variance_explained(&DoubleVonMises::undefined(), &raw).is_nan());

        let params = DoubleVonMises::new(1.0, 1.0, 0.0, PI, 0.0, 0.0).unwrap();
        let empty = TuningCurve::from((Vec::new(), Vec::new()));
        assert!(mean_squared_error(&params, &empty).is_nan());
    }
}
