//! Append-only observation store.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sva_core::array::{tail_rows, vstack};
use sva_core::{ErrorInfo, SvaError};

/// Inputs `x` and outputs `y` accumulated by an experiment.
///
/// Rows are observations. Outputs may lag behind inputs: the rows of `x`
/// past the end of `y` are pending and get filled by [`ExperimentData::update_y`].
/// The store never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentData {
    x: Option<DMatrix<f64>>,
    y: Option<DMatrix<f64>>,
}

impl ExperimentData {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding an aligned initial batch.
    pub fn from_observations(x: DMatrix<f64>, y: DMatrix<f64>) -> Result<Self, SvaError> {
        let mut data = Self::new();
        data.append(&x, &y)?;
        Ok(data)
    }

    /// Accumulated inputs.
    pub fn x(&self) -> Option<&DMatrix<f64>> {
        self.x.as_ref()
    }

    /// Accumulated outputs.
    pub fn y(&self) -> Option<&DMatrix<f64>> {
        self.y.as_ref()
    }

    /// Number of input rows.
    pub fn n(&self) -> usize {
        self.x.as_ref().map_or(0, DMatrix::nrows)
    }

    /// Number of input rows without outputs.
    pub fn pending(&self) -> usize {
        self.n()
            .saturating_sub(self.y.as_ref().map_or(0, DMatrix::nrows))
    }

    /// Input rows still waiting for outputs.
    pub fn pending_x(&self) -> Option<DMatrix<f64>> {
        match (&self.x, self.pending()) {
            (Some(x), pending) if pending > 0 => Some(tail_rows(x, pending)),
            _ => None,
        }
    }

    /// True once either inputs or outputs have been recorded.
    pub fn is_initialized(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    /// Appends input rows. The first call fixes the input width.
    pub fn update_x(&mut self, rows: &DMatrix<f64>) -> Result<(), SvaError> {
        self.x = Some(match &self.x {
            Some(existing) => vstack(existing, rows)?,
            None => rows.clone(),
        });
        Ok(())
    }

    /// Computes outputs for the pending input rows with `f` and appends them.
    ///
    /// `f` receives only the pending rows and must return one output row
    /// for each. Nothing is appended when it fails.
    pub fn update_y<F>(&mut self, f: F) -> Result<(), SvaError>
    where
        F: FnOnce(&DMatrix<f64>) -> Result<DMatrix<f64>, SvaError>,
    {
        let Some(x) = &self.x else {
            return Err(SvaError::Precondition(
                ErrorInfo::new("inputs-unset", "outputs cannot be computed before inputs")
                    .with_hint("call update_x first"),
            ));
        };
        let pending = self.pending();
        if pending == 0 {
            return Ok(());
        }
        let rows = tail_rows(x, pending);
        let outputs = f(&rows)?;
        if outputs.nrows() != pending {
            return Err(SvaError::Shape(
                ErrorInfo::new("output-rows", "one output row per pending input is required")
                    .with_context("pending", pending)
                    .with_context("returned", outputs.nrows()),
            ));
        }
        self.y = Some(match &self.y {
            Some(existing) => vstack(existing, &outputs)?,
            None => outputs,
        });
        Ok(())
    }

    /// Appends inputs `x` together with outputs for every pending row and
    /// for `x`, in that order.
    ///
    /// `y` must have `pending() + x.nrows()` rows. Nothing is stored when a
    /// check fails.
    pub fn extend(&mut self, x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<(), SvaError> {
        let expected = self.pending() + x.nrows();
        if y.nrows() != expected {
            return Err(SvaError::Shape(
                ErrorInfo::new("misaligned-batch", "outputs must cover pending and new inputs")
                    .with_context("pending", self.pending())
                    .with_context("x_rows", x.nrows())
                    .with_context("y_rows", y.nrows()),
            ));
        }
        let next_x = match &self.x {
            Some(existing) => vstack(existing, x)?,
            None => x.clone(),
        };
        let next_y = match &self.y {
            Some(existing) => vstack(existing, y)?,
            None => y.clone(),
        };
        self.x = Some(next_x);
        self.y = Some(next_y);
        Ok(())
    }

    /// Appends an aligned batch of inputs and outputs.
    ///
    /// Both matrices are checked against the stored widths before either is
    /// appended.
    pub fn append(&mut self, x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<(), SvaError> {
        if x.nrows() != y.nrows() {
            return Err(SvaError::Shape(
                ErrorInfo::new("misaligned-batch", "inputs and outputs must have equal rows")
                    .with_context("x_rows", x.nrows())
                    .with_context("y_rows", y.nrows()),
            ));
        }
        if self.pending() != 0 {
            return Err(SvaError::Precondition(
                ErrorInfo::new("pending-outputs", "stored inputs are missing outputs")
                    .with_context("pending", self.pending())
                    .with_hint("call update_y before appending aligned batches"),
            ));
        }
        let next_x = match &self.x {
            Some(existing) => vstack(existing, x)?,
            None => x.clone(),
        };
        let next_y = match &self.y {
            Some(existing) => vstack(existing, y)?,
            None => y.clone(),
        };
        self.x = Some(next_x);
        self.y = Some(next_y);
        Ok(())
    }
}
