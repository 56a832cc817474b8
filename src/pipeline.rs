//! Fit every neuron of a population: smooth, fit, and score each response row,
//! then collect the records into per-chunk [`ResultTable`]s.
//!
//! Per-neuron failures never abort a chunk. They become rows with undefined
//! parameters and a [`FitStatus`] saying why. Only a mismatch between the
//! response matrix and the stimulus angles, or a failure to persist a chunk,
//! is reported to the caller.
use std::io;
use std::ops::Range;

use thiserror::Error;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::curve::TuningCurve;
use crate::fitter::{DoubleVonMisesFitter, FitConfig, FitError, ModelFitResult};
use crate::model::DoubleVonMises;
use crate::score::mean_squared_error;
use crate::smooth::{AngularSmoother, SmoothingError, SmoothingWindow};
use crate::table::{FitRecord, FitStatus, ResultTable};

/// Errors that are local to a single neuron
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NeuronError {
    #[error("The neuron has {responses} responses but {angles} stimulus angles were given")]
    LengthMismatch { responses: usize, angles: usize },
    #[error("Could not smooth the response: {0}")]
    Smoothing(#[from] SmoothingError),
    #[error(transparent)]
    Fit(#[from] FitError),
}

impl NeuronError {
    /// Classify the error for reporting
    pub fn status(&self) -> FitStatus {
        match self {
            Self::LengthMismatch { .. } => FitStatus::BoundaryMismatch,
            Self::Smoothing(_) => FitStatus::SmoothingPrecondition,
            Self::Fit(FitError::InsufficientSignal(_)) => FitStatus::InsufficientSignal,
            Self::Fit(_) => FitStatus::FitFailure,
        }
    }

    /// The optimizer iterations spent before the failure
    pub fn iterations(&self) -> usize {
        match self {
            Self::Fit(FitError::NotConverged { iterations, .. })
            | Self::Fit(FitError::TimedOut { iterations, .. }) => *iterations,
            _ => 0,
        }
    }
}

/// Errors that stop a whole run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "The response matrix has {n_stim} stimulus columns but {n_angles} stimulus angles were given"
    )]
    BoundaryMismatch { n_stim: usize, n_angles: usize },
    #[error("The stimulus angle at index {index} is not finite")]
    NonFiniteAngle { index: usize },
    #[error("Cannot arrange {len} values as {n_neurons} neurons by {n_stim} stimuli")]
    ShapeMismatch {
        len: usize,
        n_neurons: usize,
        n_stim: usize,
    },
    #[error("Response matrix row {row} has {found} values, expected {expected}")]
    RaggedRows {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Neuron range {start}..{end} is outside the {n_neurons} neurons of the response matrix")]
    NeuronRangeOutOfBounds {
        start: usize,
        end: usize,
        n_neurons: usize,
    },
    #[error("The batch size must be at least one")]
    EmptyBatch,
    #[error("Failed to persist neurons {start}..{end}: {source}")]
    Persist {
        start: usize,
        end: usize,
        #[source]
        source: io::Error,
    },
}

/// A neurons-by-trials matrix of responses, stored row-major
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResponseMatrix {
    data: Vec<f64>,
    n_neurons: usize,
    n_stim: usize,
}

impl ResponseMatrix {
    /// Wrap row-major `data` of `n_neurons` rows
    pub fn new(data: Vec<f64>, n_neurons: usize, n_stim: usize) -> Result<Self, PipelineError> {
        if data.len() != n_neurons * n_stim {
            return Err(PipelineError::ShapeMismatch {
                len: data.len(),
                n_neurons,
                n_stim,
            });
        }
        Ok(Self {
            data,
            n_neurons,
            n_stim,
        })
    }

    /// Stack equally sized rows into a matrix
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self, PipelineError> {
        let n_stim = rows.first().map(|r| r.as_ref().len()).unwrap_or_default();
        let mut data = Vec::with_capacity(rows.len() * n_stim);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != n_stim {
                return Err(PipelineError::RaggedRows {
                    row: i,
                    found: row.len(),
                    expected: n_stim,
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            n_neurons: rows.len(),
            n_stim,
        })
    }

    pub fn n_neurons(&self) -> usize {
        self.n_neurons
    }

    pub fn n_stim(&self) -> usize {
        self.n_stim
    }

    /// `(n_neurons, n_stim)`
    pub fn shape(&self) -> (usize, usize) {
        (self.n_neurons, self.n_stim)
    }

    /// The responses of neuron `i` across all trials
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_stim..(i + 1) * self.n_stim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_neurons).map(|i| self.row(i))
    }

    /// Check that `angles` pairs one finite value with every stimulus column
    pub fn validate_angles(&self, angles: &[f64]) -> Result<(), PipelineError> {
        if angles.len() != self.n_stim {
            return Err(PipelineError::BoundaryMismatch {
                n_stim: self.n_stim,
                n_angles: angles.len(),
            });
        }
        if let Some(index) = angles.iter().position(|a| !a.is_finite()) {
            return Err(PipelineError::NonFiniteAngle { index });
        }
        Ok(())
    }
}

/// The smooth, fit, score sequence for a single neuron
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TuningPipeline {
    pub smoothing: SmoothingWindow,
    pub fit: FitConfig,
}

impl TuningPipeline {
    pub fn new(smoothing: SmoothingWindow, fit: FitConfig) -> Self {
        Self { smoothing, fit }
    }

    pub fn smoothing(mut self, smoothing: SmoothingWindow) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn fit_config(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }

    /// Run the pipeline on one neuron, surfacing the typed error on failure
    pub fn try_fit_neuron(
        &self,
        response: &[f64],
        angles: &[f64],
    ) -> Result<(DoubleVonMises, ModelFitResult, f64), NeuronError> {
        if response.len() != angles.len() {
            return Err(NeuronError::LengthMismatch {
                responses: response.len(),
                angles: angles.len(),
            });
        }
        let raw = TuningCurve::from((angles, response));
        if !raw.has_signal() {
            return Err(FitError::InsufficientSignal("the response does not vary").into());
        }

        let smoothed = AngularSmoother::new(self.smoothing).smooth(&raw)?;
        let mut fitter = DoubleVonMisesFitter::new(raw.with_response(smoothed));
        let (params, result) = fitter.fit_with(&self.fit)?;

        let mse = mean_squared_error(&params, &raw);
        Ok((params, result, mse))
    }

    /// Run the pipeline on one neuron. Failures produce a record with undefined
    /// parameters and MSE.
    pub fn fit_neuron(&self, response: &[f64], angles: &[f64]) -> FitRecord {
        match self.try_fit_neuron(response, angles) {
            Ok((params, result, mse)) => {
                FitRecord::new(params, mse, FitStatus::Fitted, result.iterations)
            }
            Err(err) => {
                log::debug!("Neuron fit failed: {err}");
                FitRecord::failed(err.status(), err.iterations())
            }
        }
    }

    /// Fit the neurons in `range`, returning their records in neuron order
    pub fn fit_chunk(
        &self,
        matrix: &ResponseMatrix,
        angles: &[f64],
        range: Range<usize>,
    ) -> Result<ResultTable, PipelineError> {
        matrix.validate_angles(angles)?;
        if range.end > matrix.n_neurons() || range.start > range.end {
            return Err(PipelineError::NeuronRangeOutOfBounds {
                start: range.start,
                end: range.end,
                n_neurons: matrix.n_neurons(),
            });
        }
        Ok(self.fit_chunk_unchecked(matrix, angles, range))
    }

    fn fit_chunk_unchecked(
        &self,
        matrix: &ResponseMatrix,
        angles: &[f64],
        range: Range<usize>,
    ) -> ResultTable {
        let start = range.start;
        let records = fit_records(self, matrix, angles, range);
        ResultTable::new(start, records)
    }

    /// Fit every neuron of `matrix` as a single table
    pub fn fit_all(
        &self,
        matrix: &ResponseMatrix,
        angles: &[f64],
    ) -> Result<ResultTable, PipelineError> {
        self.fit_chunk(matrix, angles, 0..matrix.n_neurons())
    }
}

// Can't inline cfg-if
cfg_if::cfg_if! {
    if #[cfg(feature = "parallelism")] {
        fn fit_records(
            pipeline: &TuningPipeline,
            matrix: &ResponseMatrix,
            angles: &[f64],
            range: Range<usize>,
        ) -> Vec<FitRecord> {
            // `collect_into_vec` writes each result into its slot by index, so
            // the order is independent of completion order.
            let mut records = Vec::with_capacity(range.len());
            range
                .into_par_iter()
                .map(|i| pipeline.fit_neuron(matrix.row(i), angles))
                .collect_into_vec(&mut records);
            records
        }
    } else {
        fn fit_records(
            pipeline: &TuningPipeline,
            matrix: &ResponseMatrix,
            angles: &[f64],
            range: Range<usize>,
        ) -> Vec<FitRecord> {
            range
                .map(|i| pipeline.fit_neuron(matrix.row(i), angles))
                .collect()
        }
    }
}

/// A destination for completed chunks
pub trait ChunkSink {
    /// Whether a chunk covering `range` was already persisted by an earlier run
    fn is_persisted(&self, _range: &Range<usize>) -> bool {
        false
    }

    /// Persist one completed chunk
    fn persist(&mut self, table: &ResultTable) -> io::Result<()>;
}

impl ChunkSink for Vec<ResultTable> {
    fn is_persisted(&self, range: &Range<usize>) -> bool {
        self.iter().any(|t| t.neuron_range() == *range)
    }

    fn persist(&mut self, table: &ResultTable) -> io::Result<()> {
        self.push(table.clone());
        Ok(())
    }
}

/// Counts describing a completed [`BatchDriver::run`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchSummary {
    pub chunks_written: usize,
    pub chunks_skipped: usize,
    pub neurons_fitted: usize,
    pub neurons_failed: usize,
}

/// Walk a population in fixed size chunks of neurons, persisting each chunk
/// once all of its neurons are done.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchDriver {
    pub pipeline: TuningPipeline,
    /// How many neurons to fit before each persistence barrier
    pub batch_size: usize,
    /// How many times to try persisting a chunk before giving up
    pub persist_attempts: usize,
}

impl Default for BatchDriver {
    fn default() -> Self {
        Self {
            pipeline: TuningPipeline::default(),
            batch_size: 100,
            persist_attempts: 3,
        }
    }
}

impl BatchDriver {
    pub fn new(pipeline: TuningPipeline, batch_size: usize) -> Self {
        Self {
            pipeline,
            batch_size,
            ..Default::default()
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn persist_attempts(mut self, persist_attempts: usize) -> Self {
        self.persist_attempts = persist_attempts;
        self
    }

    /// The neuron ranges each chunk covers, the last may be short
    pub fn chunk_ranges(&self, n_neurons: usize) -> Vec<Range<usize>> {
        let step = self.batch_size.max(1);
        (0..n_neurons)
            .step_by(step)
            .map(|start| start..(start + step).min(n_neurons))
            .collect()
    }

    fn persist_with_retry<S: ChunkSink>(
        &self,
        sink: &mut S,
        table: &ResultTable,
    ) -> Result<(), PipelineError> {
        let attempts = self.persist_attempts.max(1);
        let mut attempt = 1;
        loop {
            match sink.persist(table) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    log::warn!(
                        "Failed to persist neurons {}..{} (attempt {attempt}/{attempts}): {err}",
                        table.start(),
                        table.end()
                    );
                    attempt += 1;
                }
                Err(err) => {
                    return Err(PipelineError::Persist {
                        start: table.start(),
                        end: table.end(),
                        source: err,
                    })
                }
            }
        }
    }

    /// Fit every neuron of `matrix` chunk by chunk, handing each finished
    /// chunk to `sink`.
    ///
    /// The inputs are validated once before any neuron is fit. Chunks the sink
    /// already holds are skipped, so an interrupted run can be resumed.
    pub fn run<S: ChunkSink>(
        &self,
        matrix: &ResponseMatrix,
        angles: &[f64],
        sink: &mut S,
    ) -> Result<BatchSummary, PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::EmptyBatch);
        }
        matrix.validate_angles(angles)?;

        let mut summary = BatchSummary::default();
        for range in self.chunk_ranges(matrix.n_neurons()) {
            if sink.is_persisted(&range) {
                log::warn!(
                    "Neurons {}..{} were already persisted, skipping",
                    range.start,
                    range.end
                );
                summary.chunks_skipped += 1;
                continue;
            }
            log::info!("Fitting neurons {}..{}", range.start, range.end);
            let table = self.pipeline.fit_chunk_unchecked(matrix, angles, range);
            let failed = table.n_failed();

            self.persist_with_retry(sink, &table)?;
            log::info!(
                "Persisted neurons {}..{} ({failed} of {} failed)",
                table.start(),
                table.end(),
                table.len()
            );
            summary.chunks_written += 1;
            summary.neurons_failed += failed;
            summary.neurons_fitted += table.len() - failed;
        }
        Ok(summary)
    }
}
