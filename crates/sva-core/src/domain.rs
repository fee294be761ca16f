//! Box-shaped input domains.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, SvaError};

/// Axis aligned bounds over `d` input dimensions.
///
/// The conventional array form is `2 x d`: row 0 holds the lower bounds and
/// row 1 the upper bounds. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DomainRecord")]
pub struct Domain {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

#[derive(Deserialize)]
struct DomainRecord {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl TryFrom<DomainRecord> for Domain {
    type Error = SvaError;

    fn try_from(record: DomainRecord) -> Result<Self, Self::Error> {
        Domain::new(record.lower, record.upper)
    }
}

impl Domain {
    /// Creates a domain from explicit lower and upper bounds.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, SvaError> {
        if lower.len() != upper.len() {
            return Err(SvaError::Config(
                ErrorInfo::new("domain-length", "lower and upper bounds differ in length")
                    .with_context("lower", lower.len())
                    .with_context("upper", upper.len()),
            ));
        }
        for (dim, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if !(lo.is_finite() && hi.is_finite()) || lo > hi {
                return Err(SvaError::Config(
                    ErrorInfo::new("domain-bounds", "bounds must be finite with lower <= upper")
                        .with_context("dim", dim)
                        .with_context("lower", lo)
                        .with_context("upper", hi),
                ));
            }
        }
        Ok(Self { lower, upper })
    }

    /// Creates a domain from its `2 x d` array form.
    pub fn from_matrix(bounds: &DMatrix<f64>) -> Result<Self, SvaError> {
        if bounds.nrows() != 2 {
            return Err(SvaError::Shape(
                ErrorInfo::new("domain-shape", "domain must have shape (2, d)")
                    .with_context("rows", bounds.nrows()),
            ));
        }
        Self::new(
            bounds.row(0).iter().copied().collect(),
            bounds.row(1).iter().copied().collect(),
        )
    }

    /// Same bounds `[lo, hi]` on each of `dim` dimensions.
    pub fn uniform(dim: usize, lo: f64, hi: f64) -> Result<Self, SvaError> {
        Self::new(vec![lo; dim], vec![hi; dim])
    }

    /// Returns the `2 x d` array form.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(2, self.dim(), |i, j| {
            if i == 0 {
                self.lower[j]
            } else {
                self.upper[j]
            }
        })
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Lower bounds.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds.
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Width of dimension `j`.
    pub fn span(&self, j: usize) -> f64 {
        self.upper[j] - self.lower[j]
    }

    /// Whether `value` lies within the bounds of dimension `j`.
    pub fn contains(&self, j: usize, value: f64) -> bool {
        self.lower[j] <= value && value <= self.upper[j]
    }

    /// Clamps `value` into the bounds of dimension `j`.
    pub fn clamp(&self, j: usize, value: f64) -> f64 {
        value.max(self.lower[j]).min(self.upper[j])
    }

    /// Returns the first `(row, column)` of the leading `d` columns of `x`
    /// that falls outside the domain.
    pub fn first_violation(&self, x: &DMatrix<f64>) -> Option<(usize, usize)> {
        for i in 0..x.nrows() {
            for j in 0..self.dim() {
                if !self.contains(j, x[(i, j)]) {
                    return Some((i, j));
                }
            }
        }
        None
    }
}
