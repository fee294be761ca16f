//! Two-dimensional array helpers over `nalgebra::DMatrix<f64>`.
//!
//! Rows are observations and columns are dimensions throughout SVA. The
//! helpers here keep that convention explicit at the call sites.

use nalgebra::DMatrix;

use crate::errors::{ErrorInfo, SvaError};

/// Builds a matrix from row-major nested vectors.
pub fn from_rows(rows: &[Vec<f64>]) -> Result<DMatrix<f64>, SvaError> {
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != ncols) {
        return Err(SvaError::Shape(
            ErrorInfo::new("ragged-rows", "all rows must have the same length")
                .with_context("row", idx)
                .with_context("expected", ncols)
                .with_context("found", row.len()),
        ));
    }
    let data: Vec<f64> = rows.iter().flatten().copied().collect();
    Ok(DMatrix::from_row_slice(rows.len(), ncols, &data))
}

/// Returns the matrix as row-major nested vectors.
pub fn to_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

/// Concatenates `bottom` under `top` along the observation axis.
pub fn vstack(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
    if top.ncols() != bottom.ncols() {
        return Err(SvaError::Shape(
            ErrorInfo::new("column-mismatch", "cannot stack arrays of different widths")
                .with_context("top", top.ncols())
                .with_context("bottom", bottom.ncols()),
        ));
    }
    let rows = top.nrows() + bottom.nrows();
    Ok(DMatrix::from_fn(rows, top.ncols(), |i, j| {
        if i < top.nrows() {
            top[(i, j)]
        } else {
            bottom[(i - top.nrows(), j)]
        }
    }))
}

/// Appends a column filled with `value` to the right of `matrix`.
pub fn append_constant_column(matrix: &DMatrix<f64>, value: f64) -> DMatrix<f64> {
    let ncols = matrix.ncols();
    DMatrix::from_fn(matrix.nrows(), ncols + 1, |i, j| {
        if j < ncols {
            matrix[(i, j)]
        } else {
            value
        }
    })
}

/// Returns the last `count` rows of `matrix`.
pub fn tail_rows(matrix: &DMatrix<f64>, count: usize) -> DMatrix<f64> {
    let count = count.min(matrix.nrows());
    matrix.rows(matrix.nrows() - count, count).into_owned()
}

/// Copies the rows at `indices` into a new matrix, preserving their order.
pub fn take_rows(matrix: &DMatrix<f64>, indices: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(indices.len(), matrix.ncols(), |i, j| matrix[(indices[i], j)])
}

/// Copies every column except `column` into a new matrix.
pub fn without_column(matrix: &DMatrix<f64>, column: usize) -> DMatrix<f64> {
    let ncols = matrix.ncols().saturating_sub(1);
    DMatrix::from_fn(matrix.nrows(), ncols, |i, j| {
        if j < column {
            matrix[(i, j)]
        } else {
            matrix[(i, j + 1)]
        }
    })
}

/// `n` evenly spaced values over `[lo, hi]`, both ends included.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}

/// Interprets a floating point task column entry as a modality index.
///
/// Returns `None` for negative, fractional or non-finite values.
pub fn as_index(value: f64) -> Option<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Some(value as usize)
    } else {
        None
    }
}
