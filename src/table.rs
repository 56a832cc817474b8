//! Per-neuron fit records and the per-chunk result table.
use std::fmt::Display;
use std::io::{self, prelude::*};
use std::ops::{Index, Range};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::model::{DoubleVonMises, PARAMETER_NAMES};

/// The persisted column schema, in order
pub const COLUMNS: [&str; 7] = ["A0", "A1", "mu0", "mu1", "kappa0", "kappa1", "mse"];

/// The outcome of fitting a single neuron
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitStatus {
    /// The optimizer converged and the parameters are defined
    #[default]
    Fitted,
    /// The response had no usable variation, fitting was skipped
    InsufficientSignal,
    /// The smoothing window could not be applied to this neuron's samples
    SmoothingPrecondition,
    /// The optimizer did not converge within its iteration or time budget
    FitFailure,
    /// The neuron's responses and the stimulus angles differ in length
    BoundaryMismatch,
}

impl FitStatus {
    pub fn is_fitted(&self) -> bool {
        matches!(self, Self::Fitted)
    }
}

impl Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Fitted => "fitted",
            Self::InsufficientSignal => "insufficient-signal",
            Self::SmoothingPrecondition => "smoothing-precondition",
            Self::FitFailure => "fit-failure",
            Self::BoundaryMismatch => "boundary-mismatch",
        };
        f.write_str(label)
    }
}

/// The fitted parameters of one neuron and the fit's error against its raw responses
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitRecord {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub params: DoubleVonMises,
    pub mse: f64,
    pub status: FitStatus,
    /// Optimizer iterations spent, zero when fitting was skipped
    pub iterations: usize,
}

impl FitRecord {
    pub fn new(params: DoubleVonMises, mse: f64, status: FitStatus, iterations: usize) -> Self {
        Self {
            params,
            mse,
            status,
            iterations,
        }
    }

    /// A record with undefined parameters and MSE for a neuron that failed with `status`
    pub fn failed(status: FitStatus, iterations: usize) -> Self {
        Self::new(DoubleVonMises::undefined(), f64::NAN, status, iterations)
    }

    pub fn is_fitted(&self) -> bool {
        self.status.is_fitted()
    }

    /// The values in [`COLUMNS`] order
    pub fn row(&self) -> [f64; 7] {
        let p = self.params.as_array();
        [p[0], p[1], p[2], p[3], p[4], p[5], self.mse]
    }
}

/// The ordered fit records of a contiguous range of neurons.
///
/// Row `i` always describes neuron `start + i`; failed neurons keep their row.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResultTable {
    start: usize,
    records: Vec<FitRecord>,
}

impl ResultTable {
    /// Create a table for neurons `start..start + records.len()`
    pub fn new(start: usize, records: Vec<FitRecord>) -> Self {
        Self { start, records }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// The exclusive upper bound of the neuron index range
    pub fn end(&self) -> usize {
        self.start + self.records.len()
    }

    pub fn neuron_range(&self) -> Range<usize> {
        self.start..self.end()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FitRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[FitRecord] {
        &self.records
    }

    /// Look up the record of neuron `neuron_index`, using the global neuron index
    pub fn get_neuron(&self, neuron_index: usize) -> Option<&FitRecord> {
        neuron_index
            .checked_sub(self.start)
            .and_then(|i| self.records.get(i))
    }

    /// The number of neurons that did not produce a fit
    pub fn n_failed(&self) -> usize {
        self.records.iter().filter(|r| !r.is_fitted()).count()
    }

    /// The name a persisted copy of this table should carry, without extension
    pub fn file_stem(&self) -> String {
        chunk_file_stem(&self.neuron_range())
    }

    /// Write the table as tab separated text with a header row.
    ///
    /// Undefined values are written as `NaN`.
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "{}", COLUMNS.join("\t"))?;
        for record in self.records.iter() {
            let row = record.row();
            let mut fields = row.iter();
            if let Some(first) = fields.next() {
                write!(writer, "{first}")?;
            }
            for value in fields {
                write!(writer, "\t{value}")?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}

impl Index<usize> for ResultTable {
    type Output = FitRecord;

    fn index(&self, index: usize) -> &Self::Output {
        &self.records[index]
    }
}

impl<'a> IntoIterator for &'a ResultTable {
    type Item = &'a FitRecord;
    type IntoIter = std::slice::Iter<'a, FitRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// `fitted_params_neurons_<start>-<end>` for a chunk covering `range`
pub fn chunk_file_stem(range: &Range<usize>) -> String {
    format!("fitted_params_neurons_{}-{}", range.start, range.end)
}

const _: () = assert!(PARAMETER_NAMES.len() + 1 == COLUMNS.len());
