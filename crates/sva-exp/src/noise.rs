//! Observation noise injected on top of truth evaluations.

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use sva_core::{ErrorInfo, RngHandle, SvaError};

/// Heteroscedastic noise scale as a function of the inputs.
///
/// Returns standard deviations of shape `(N, n_output_dim)` or `(N, 1)`.
pub type NoiseFn = Arc<dyn Fn(&DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> + Send + Sync>;

/// Gaussian noise added to truth outputs. Scales are standard deviations.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "scale", rename_all = "kebab-case")]
pub enum NoiseModel {
    /// Noise-free observations.
    #[default]
    None,
    /// One standard deviation for every output.
    Scalar(f64),
    /// One standard deviation per output column.
    PerOutput(Vec<f64>),
    /// Input-dependent standard deviations.
    #[serde(skip)]
    Callable(NoiseFn),
}

impl fmt::Debug for NoiseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseModel::None => f.write_str("None"),
            NoiseModel::Scalar(scale) => f.debug_tuple("Scalar").field(scale).finish(),
            NoiseModel::PerOutput(scales) => f.debug_tuple("PerOutput").field(scales).finish(),
            NoiseModel::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl PartialEq for NoiseModel {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NoiseModel::None, NoiseModel::None) => true,
            (NoiseModel::Scalar(a), NoiseModel::Scalar(b)) => a == b,
            (NoiseModel::PerOutput(a), NoiseModel::PerOutput(b)) => a == b,
            (NoiseModel::Callable(a), NoiseModel::Callable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl NoiseModel {
    /// Wraps a closure as callable noise.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> + Send + Sync + 'static,
    {
        NoiseModel::Callable(Arc::new(f))
    }

    /// Whether the model survives serialization.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, NoiseModel::Callable(_))
    }

    /// Checks scales against the experiment's output width.
    pub fn validate(&self, n_output_dim: usize) -> Result<(), SvaError> {
        match self {
            NoiseModel::None | NoiseModel::Callable(_) => Ok(()),
            NoiseModel::Scalar(scale) => check_scale(*scale, 0),
            NoiseModel::PerOutput(scales) => {
                if scales.len() != n_output_dim {
                    return Err(SvaError::Config(
                        ErrorInfo::new("noise-length", "one noise scale per output is required")
                            .with_context("scales", scales.len())
                            .with_context("n_output_dim", n_output_dim),
                    ));
                }
                scales
                    .iter()
                    .enumerate()
                    .try_for_each(|(idx, scale)| check_scale(*scale, idx))
            }
        }
    }

    /// Returns `y` with noise drawn from `seed` added.
    ///
    /// Draws are taken row-major, one per output entry. [`NoiseModel::None`]
    /// returns `y` unchanged.
    pub fn apply(
        &self,
        x: &DMatrix<f64>,
        y: &DMatrix<f64>,
        seed: u64,
    ) -> Result<DMatrix<f64>, SvaError> {
        let scales = match self {
            NoiseModel::None => return Ok(y.clone()),
            NoiseModel::Scalar(scale) => {
                check_scale(*scale, 0)?;
                DMatrix::from_element(y.nrows(), y.ncols(), *scale)
            }
            NoiseModel::PerOutput(scales) => {
                self.validate(y.ncols())?;
                DMatrix::from_fn(y.nrows(), y.ncols(), |_, j| scales[j])
            }
            NoiseModel::Callable(f) => broadcast_scales(f(x)?, y)?,
        };
        let mut rng = RngHandle::from_seed(seed);
        let mut noisy = y.clone();
        for i in 0..y.nrows() {
            for j in 0..y.ncols() {
                let z: f64 = rng.sample(StandardNormal);
                noisy[(i, j)] += scales[(i, j)] * z;
            }
        }
        Ok(noisy)
    }
}

fn check_scale(scale: f64, index: usize) -> Result<(), SvaError> {
    if scale.is_finite() && scale >= 0.0 {
        Ok(())
    } else {
        Err(SvaError::Config(
            ErrorInfo::new("noise-scale", "noise scales must be finite and non-negative")
                .with_context("index", index)
                .with_context("scale", scale),
        ))
    }
}

fn broadcast_scales(scales: DMatrix<f64>, y: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
    if scales.nrows() != y.nrows() || (scales.ncols() != y.ncols() && scales.ncols() != 1) {
        return Err(SvaError::Config(
            ErrorInfo::new("noise-shape", "callable noise must return (N, n_output_dim) or (N, 1)")
                .with_context("rows", scales.nrows())
                .with_context("columns", scales.ncols())
                .with_context("expected_rows", y.nrows())
                .with_context("expected_columns", y.ncols()),
        ));
    }
    for (idx, scale) in scales.iter().enumerate() {
        check_scale(*scale, idx)?;
    }
    if scales.ncols() == y.ncols() {
        return Ok(scales);
    }
    Ok(DMatrix::from_fn(y.nrows(), y.ncols(), |i, _| scales[(i, 0)]))
}
