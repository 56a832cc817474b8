//! Paired stimulus angle and response arrays for a single neuron.
use std::{borrow::Cow, iter::FusedIterator};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{circular_distance, wrap_angle};

/// An iterator over the `(angle, response)` pairs of a [`TuningCurve`]
pub struct TuningCurveIter<'a> {
    inner: std::iter::Zip<
        std::iter::Copied<std::slice::Iter<'a, f64>>,
        std::iter::Copied<std::slice::Iter<'a, f64>>,
    >,
}

impl<'a> Iterator for TuningCurveIter<'a> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> FusedIterator for TuningCurveIter<'a> {}

impl<'a> ExactSizeIterator for TuningCurveIter<'a> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// A neuron's responses paired by index with the stimulus angle shown on
/// each trial.
///
/// The pairs are not required to be sorted or unique by angle. Operations that
/// depend upon the angular ordering, like [`TuningCurve::peak_indices`], work
/// through [`TuningCurve::angle_order`].
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TuningCurve<'a, 'b> {
    /// The stimulus angle of each trial, in radians
    pub angle: Cow<'a, [f64]>,
    /// The response observed on each trial
    pub response: Cow<'b, [f64]>,
}

impl<'a, 'b> TuningCurve<'a, 'b> {
    /// # Panics
    /// If `angle` and `response` differ in length
    pub fn new(angle: Cow<'a, [f64]>, response: Cow<'b, [f64]>) -> Self {
        assert_eq!(
            angle.len(),
            response.len(),
            "angle array length ({}) must equal response length ({})",
            angle.len(),
            response.len()
        );
        Self { angle, response }
    }

    pub fn len(&self) -> usize {
        self.angle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angle.is_empty()
    }

    pub fn iter(&self) -> TuningCurveIter<'_> {
        TuningCurveIter {
            inner: self
                .angle
                .iter()
                .copied()
                .zip(self.response.iter().copied()),
        }
    }

    /// Create a new [`TuningCurve`] that borrows from this one
    pub fn borrow(&self) -> TuningCurve<'_, '_> {
        TuningCurve::new(
            Cow::Borrowed(self.angle.as_ref()),
            Cow::Borrowed(self.response.as_ref()),
        )
    }

    /// Pair the same angles with a different response vector, e.g. a smoothed copy
    pub fn with_response(&self, response: Vec<f64>) -> TuningCurve<'_, 'static> {
        TuningCurve::new(Cow::Borrowed(self.angle.as_ref()), Cow::Owned(response))
    }

    pub fn get(&self, index: usize) -> Option<(f64, f64)> {
        self.angle
            .get(index)
            .copied()
            .zip(self.response.get(index).copied())
    }

    /// The index of the largest response. Ties resolve to the earliest trial.
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        let mut best_val = f64::NEG_INFINITY;
        for (i, y) in self.response.iter().copied().enumerate() {
            if y > best_val {
                best_val = y;
                best = i;
            }
        }
        best
    }

    /// The trial indices ordered by wrapped angle. Equal angles keep trial order.
    pub fn angle_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|a, b| wrap_angle(self.angle[*a]).total_cmp(&wrap_angle(self.angle[*b])));
        order
    }

    /// Find the indices of circular local maxima, walking the trials in angle
    /// order so the first and last samples are neighbors.
    ///
    /// Plateaus report every member.
    pub fn peak_indices(&self) -> Vec<usize> {
        let order = self.angle_order();
        let n = order.len();
        if n < 3 {
            return order;
        }
        let mut indices = Vec::new();
        for (k, i) in order.iter().copied().enumerate() {
            let y = self.response[i];
            let prev = self.response[order[(k + n - 1) % n]];
            let next = self.response[order[(k + 1) % n]];
            if y >= prev && y >= next {
                indices.push(i);
            }
        }
        indices
    }

    /// The trial whose angle lies closest to `theta` on the circle
    pub fn nearest_index(&self, theta: f64) -> Option<usize> {
        self.angle
            .iter()
            .copied()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                circular_distance(*a, theta).total_cmp(&circular_distance(*b, theta))
            })
            .map(|(i, _)| i)
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        self.response.iter().sum::<f64>() / self.len() as f64
    }

    /// The population variance of the response
    pub fn variance(&self) -> f64 {
        let mean = self.mean();
        if mean.is_nan() {
            return f64::NAN;
        }
        self.response.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / self.len() as f64
    }

    /// The `(min, max)` response, or `None` when empty
    pub fn response_range(&self) -> Option<(f64, f64)> {
        if self.is_empty() {
            return None;
        }
        Some(self.response.iter().copied().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), y| (lo.min(y), hi.max(y)),
        ))
    }

    /// Whether the response varies at all, relative to its own magnitude
    pub fn has_signal(&self) -> bool {
        match self.response_range() {
            Some((lo, hi)) => {
                let scale = lo.abs().max(hi.abs()).max(f64::MIN_POSITIVE);
                (hi - lo) > scale * 1e-12
            }
            None => false,
        }
    }
}

impl<'a, 'b> From<(&'a [f64], &'b [f64])> for TuningCurve<'a, 'b> {
    fn from(value: (&'a [f64], &'b [f64])) -> Self {
        Self::new(Cow::Borrowed(value.0), Cow::Borrowed(value.1))
    }
}

impl From<(Vec<f64>, Vec<f64>)> for TuningCurve<'static, 'static> {
    fn from(value: (Vec<f64>, Vec<f64>)) -> Self {
        Self::new(Cow::Owned(value.0), Cow::Owned(value.1))
    }
}
