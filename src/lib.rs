//! `vmtuning` fits double von Mises tuning curves to the responses of a population
//! of neurons recorded under oriented stimuli, one independent fit per neuron.
//!
//! Each neuron's responses pass through three stages:
//! 1. An [`AngularSmoother`] runs a quadratic Savitzky-Golay filter over the responses
//!    in angle order, respecting the circularity of the stimulus space.
//! 2. A [`DoubleVonMisesFitter`] runs a bounded Levenberg-Marquardt solve of the
//!    [`DoubleVonMises`] model against the smoothed curve.
//! 3. The fit is scored against the *raw* responses with [`mean_squared_error`].
//!
//! [`TuningPipeline`] wires these stages together, and [`BatchDriver`] walks a whole
//! [`ResponseMatrix`] in chunks, handing each finished [`ResultTable`] to a
//! [`ChunkSink`] such as [`DirectorySink`]. A neuron that cannot be fit keeps its
//! row, with every value set to NaN.
//!
//! # Usage
//! ```
//! use vmtuning::{angle_grid, DoubleVonMises, ResponseMatrix, TuningPipeline};
//! use vmtuning::model::CircularModel;
//!
//! let angles = angle_grid(72);
//! let truth = DoubleVonMises::new(2.0, 1.0, 0.5, 0.5 + std::f64::consts::PI, 2.0, 2.0).unwrap();
//! let matrix = ResponseMatrix::from_rows(&[truth.predict(&angles)]).unwrap();
//!
//! let table = TuningPipeline::default().fit_all(&matrix, &angles).unwrap();
//! let record = &table[0];
//! assert!(record.is_fitted());
//! assert!((record.params.mu0() - 0.5).abs() < 0.05);
//! ```
//!
//! ## Features
//! - `parallelism` (default) fits the neurons of a chunk on the `rayon` thread pool.
//!   Results are identical to the sequential path and stay in neuron order.
//! - `serde` derives `Serialize` and `Deserialize` for parameters, records, and configuration.

pub mod arrayops;
pub mod curve;
pub mod fitter;
pub mod model;
pub mod pipeline;
pub mod prelude;
pub mod score;
pub mod smooth;
pub mod table;
pub mod text;

#[cfg(test)]
mod test_data;

pub use crate::arrayops::{angle_grid, circular_distance, wrap_angle};
pub use crate::curve::TuningCurve;
pub use crate::fitter::{DoubleVonMisesFitter, FitConfig, FitError, ModelFitResult};
pub use crate::model::{DoubleVonMises, FitParameters};
pub use crate::pipeline::{
    BatchDriver, BatchSummary, ChunkSink, NeuronError, PipelineError, ResponseMatrix,
    TuningPipeline,
};
pub use crate::score::{mean_squared_error, variance_explained};
pub use crate::smooth::{AngularSmoother, EdgeMode, SavitskyGolay, SmoothingError, SmoothingWindow};
pub use crate::table::{FitRecord, FitStatus, ResultTable};
pub use crate::text::DirectorySink;
