//! Contract between the experiment loop and a surrogate modeling service.

use std::fmt::Debug;

use nalgebra::DMatrix;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sva_core::{ErrorInfo, SvaError};

/// Location and cardinality of the task (modality) column in training inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Column of the training inputs holding the task index.
    pub column: usize,
    /// Number of distinct tasks the model distinguishes.
    pub n_tasks: usize,
}

/// Pointwise predictive moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predictive mean per row.
    pub mean: Vec<f64>,
    /// Predictive variance per row (latent function, noise excluded).
    pub variance: Vec<f64>,
}

impl Prediction {
    /// Predictive standard deviation per row.
    pub fn std(&self) -> Vec<f64> {
        self.variance.iter().map(|v| v.max(0.0).sqrt()).collect()
    }
}

/// Linear weighting over task outputs applied before acquisition scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorTransform {
    weights: Vec<f64>,
}

impl PosteriorTransform {
    /// Creates a transform from explicit weights, one per task.
    pub fn new(weights: Vec<f64>) -> Result<Self, SvaError> {
        if weights.is_empty() || weights.iter().any(|w| !w.is_finite()) {
            return Err(SvaError::Config(
                ErrorInfo::new("transform-weights", "weights must be finite and non-empty")
                    .with_context("len", weights.len()),
            ));
        }
        Ok(Self { weights })
    }

    /// Weight 1 at `selected`, 0 at every other of the `n_tasks` tasks.
    pub fn one_hot(n_tasks: usize, selected: usize) -> Result<Self, SvaError> {
        if selected >= n_tasks {
            return Err(SvaError::Config(
                ErrorInfo::new("modality-out-of-range", "selected modality does not exist")
                    .with_context("selected", selected)
                    .with_context("n_modalities", n_tasks),
            ));
        }
        let mut weights = vec![0.0; n_tasks];
        weights[selected] = 1.0;
        Ok(Self { weights })
    }

    /// Identity transform for single-output models.
    pub fn single() -> Self {
        Self { weights: vec![1.0] }
    }

    /// Task weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Task with the largest weight; first one wins on ties.
    pub fn dominant_task(&self) -> usize {
        let mut best = 0;
        for (idx, w) in self.weights.iter().enumerate() {
            if *w > self.weights[best] {
                best = idx;
            }
        }
        best
    }
}

/// A fitted regression model usable by the acquisition service.
///
/// Models are plain data: cloning is a deep copy, and serialization is how
/// the loop snapshots a model into the history log.
pub trait Surrogate: Clone + Debug + Serialize + DeserializeOwned {
    /// Label identifying the model family inside snapshots.
    fn kind(&self) -> &'static str;

    /// Number of tasks distinguished by the model (1 for single-task).
    fn n_tasks(&self) -> usize;

    /// Number of feature columns, excluding any task column.
    fn n_features(&self) -> usize;

    /// Predictive moments for full input rows (task column included when the
    /// model is multi-task).
    fn predict(&self, x: &DMatrix<f64>) -> Result<Prediction, SvaError>;

    /// Predictive moments of the transform-weighted combination of task
    /// outputs at feature-only rows.
    fn posterior(
        &self,
        features: &DMatrix<f64>,
        transform: &PosteriorTransform,
    ) -> Result<Prediction, SvaError>;

    /// Returns a copy conditioned on pseudo observations `values` at
    /// feature-only rows for `task`, keeping hyperparameters fixed.
    fn fantasize(
        &self,
        features: &DMatrix<f64>,
        task: usize,
        values: &[f64],
    ) -> Result<Self, SvaError>;
}

/// Service fitting a [`Surrogate`] to accumulated observations.
pub trait SurrogateFitter {
    /// Model type produced by the service.
    type Model: Surrogate;

    /// Fits a model to inputs `x` and scalar targets `y` (one per row).
    ///
    /// With `task` set, the given column of `x` is a task index and the
    /// remaining columns are features.
    fn fit(
        &self,
        x: &DMatrix<f64>,
        y: &[f64],
        task: Option<TaskSpec>,
    ) -> Result<Self::Model, SvaError>;
}

/// Opaque deep copy of a fitted model, taken when a history record is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// `Surrogate::kind` of the captured model.
    pub kind: String,
    /// bincode encoding of the model.
    pub payload: Vec<u8>,
}

impl ModelSnapshot {
    /// Captures a snapshot of `model`.
    pub fn capture<M: Surrogate>(model: &M) -> Result<Self, SvaError> {
        let payload = bincode::serialize(model)
            .map_err(|err| SvaError::serde("snapshot-encode", err))?;
        Ok(Self {
            kind: model.kind().to_string(),
            payload,
        })
    }

    /// Restores the captured model.
    pub fn restore<M: Surrogate>(&self) -> Result<M, SvaError> {
        let model: M = bincode::deserialize(&self.payload)
            .map_err(|err| SvaError::serde("snapshot-decode", err))?;
        if model.kind() != self.kind {
            return Err(SvaError::Serde(
                ErrorInfo::new("snapshot-kind", "snapshot holds a different model family")
                    .with_context("expected", model.kind())
                    .with_context("found", &self.kind),
            ));
        }
        Ok(model)
    }
}
