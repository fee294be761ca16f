//! Dreamed experiments: synthetic truths drawn from a surrogate posterior.

use std::sync::Arc;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sva_core::{derive_substream_seed, Domain, ErrorInfo, SvaError};
use sva_models::{GaussianProcess, Surrogate, TrainProtocol};
use tracing::info;

use crate::data::ExperimentData;
use crate::experiment::{dense_grid, Experiment, PointsPerDim};
use crate::properties::ExperimentProperties;
use crate::truth::Truth;

const OPTIMA_RESTARTS: usize = 150;
const OPTIMA_RAW_SAMPLES: usize = 150;

/// Noise-free truth given by the posterior mean of a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamedTruth {
    model: GaussianProcess,
}

impl DreamedTruth {
    /// Registry name.
    pub const NAME: &'static str = "dreamed";

    /// Truth returning the mean of `model`.
    pub fn new(model: GaussianProcess) -> Self {
        Self { model }
    }

    /// Underlying model.
    pub fn model(&self) -> &GaussianProcess {
        &self.model
    }
}

impl Truth for DreamedTruth {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Result<Value, SvaError> {
        serde_json::to_value(self).map_err(|err| SvaError::serde("truth-params", err))
    }

    fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        let prediction = self.model.predict(x)?;
        Ok(DMatrix::from_column_slice(x.nrows(), 1, &prediction.mean))
    }
}

/// Builds an experiment whose truth is one posterior draw of a model fitted
/// to `(x, y)`.
///
/// A single-task model is fitted with `train_with` (`"mll"` or `"Adam"`),
/// sampled once on the `ppd` grid over `domain`, and a second model fitted
/// to that sample becomes the truth. The experiment starts with `(x, y)` as
/// data and records the maximizer of the dreamed truth under
/// `metadata["optima"]`.
pub fn dreamed_experiment(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    domain: Domain,
    train_with: &str,
    ppd: &PointsPerDim,
    seed: u64,
) -> Result<Experiment, SvaError> {
    let protocol: TrainProtocol = train_with.parse()?;
    if y.ncols() != 1 {
        return Err(SvaError::Shape(
            ErrorInfo::new("dream-output-width", "dreamed experiments take one output column")
                .with_context("columns", y.ncols()),
        ));
    }
    if x.ncols() != domain.dim() {
        return Err(SvaError::Shape(
            ErrorInfo::new("dream-input-width", "inputs must match the domain")
                .with_context("columns", x.ncols())
                .with_context("domain", domain.dim()),
        ));
    }
    let targets: Vec<f64> = y.column(0).iter().copied().collect();
    let reference = GaussianProcess::fit(x, &targets, None, &protocol)?;

    let grid = dense_grid(&domain, ppd)?;
    let sample = reference.sample_posterior(&grid, derive_substream_seed(seed, 0))?;
    let dreamed = GaussianProcess::fit(&grid, &sample, None, &protocol)?;
    let (argmax, max) = dreamed.optimize_mean(
        &domain,
        0,
        OPTIMA_RESTARTS,
        OPTIMA_RAW_SAMPLES,
        derive_substream_seed(seed, 1),
    )?;
    info!(grid = grid.nrows(), optimum = max, "dreamed a truth function");

    let properties = ExperimentProperties::new(domain.dim(), 1, None, domain)?;
    let mut experiment = Experiment::new(Arc::new(properties), Arc::new(DreamedTruth::new(dreamed)))
        .with_data(ExperimentData::from_observations(x.clone(), y.clone())?)?;
    experiment
        .metadata_mut()
        .insert("optima".to_string(), json!({ "x": argmax, "value": max }));
    Ok(experiment)
}
