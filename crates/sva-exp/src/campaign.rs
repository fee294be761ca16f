//! The model-guided experiment loop.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sva_core::array::{append_constant_column, as_index, take_rows};
use sva_core::{derive_substream_seed, ErrorInfo, SvaError};
use sva_models::{
    AcquisitionConfig, AcquisitionService, AskRequest, GpFitter, ModelSnapshot, OptimizeAcqf,
    OptimizerSettings, PosteriorTransform, SurrogateFitter, TaskSpec, BEST_F,
};
use tracing::{debug, info};

use crate::experiment::Experiment;
use crate::history::HistoryRecord;

/// Default acquisition seed of a loop.
pub const DEFAULT_LOOP_SEED: u64 = 0x5eed;

/// Reduces the outputs of one modality's rows to one target per row.
pub type Scalarizer = dyn Fn(&DMatrix<f64>, &DMatrix<f64>) -> Result<Vec<f64>, SvaError>;

/// Serializable loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Number of points this invocation may acquire.
    ///
    /// Counted per call, not against the accumulated observation count: the
    /// loop stops once the points acquired since the call began reach the
    /// budget, so a resumed campaign gets a fresh budget. With `q == 1` this
    /// is exactly `budget` iterations; a batch may overshoot by up to
    /// `q - 1` points.
    pub budget: usize,
    /// Column of the inputs holding the modality index; the last column
    /// when unset.
    #[serde(default)]
    pub task_feature: Option<usize>,
    /// Acquisition family and hyperparameters.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Acquisition optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    /// Report each iteration at info level.
    #[serde(default = "default_progress")]
    pub progress: bool,
    /// Master seed for acquisition; iteration `ii` uses its substream `ii`.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_progress() -> bool {
    true
}

fn default_seed() -> u64 {
    DEFAULT_LOOP_SEED
}

impl LoopConfig {
    /// Defaults with the given budget.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            task_feature: None,
            acquisition: AcquisitionConfig::default(),
            optimizer: OptimizerSettings::default(),
            progress: default_progress(),
            seed: default_seed(),
        }
    }
}

/// Callbacks steering the loop.
pub struct LoopHooks {
    /// Modality to acquire for at the given iteration index.
    pub modality: Box<dyn Fn(usize) -> usize>,
    /// Optional reduction of multi-output data to a scalar target.
    pub scalarize: Option<Box<Scalarizer>>,
}

impl Default for LoopHooks {
    fn default() -> Self {
        Self {
            modality: Box::new(|_| 0),
            scalarize: None,
        }
    }
}

impl LoopHooks {
    /// Replaces the modality callback.
    pub fn with_modality<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> usize + 'static,
    {
        self.modality = Box::new(f);
        self
    }

    /// Installs a scalarization callback.
    pub fn with_scalarizer<F>(mut self, f: F) -> Self
    where
        F: Fn(&DMatrix<f64>, &DMatrix<f64>) -> Result<Vec<f64>, SvaError> + 'static,
    {
        self.scalarize = Some(Box::new(f));
        self
    }
}

/// Outcome of one loop invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSummary {
    /// Index the invocation started from.
    pub first_iteration: usize,
    /// Index of the last completed iteration, if any ran.
    pub last_iteration: Option<usize>,
    /// Number of iterations completed.
    pub iterations_run: usize,
    /// Number of points acquired.
    pub points_acquired: usize,
    /// Observation rows after the invocation.
    pub n_observations: usize,
}

/// Scalar fit target per row of `x`.
///
/// With `scalarize`, rows are grouped by the modality in `task_column`
/// (all rows form one group when it is `None`) and each group's outputs are
/// reduced separately. Rows naming no known modality stay `None`. Without
/// `scalarize`, `y` must have exactly one column.
pub fn select_target(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    task_column: Option<usize>,
    n_modalities: usize,
    scalarize: Option<&Scalarizer>,
) -> Result<Vec<Option<f64>>, SvaError> {
    if x.nrows() != y.nrows() {
        return Err(SvaError::Shape(
            ErrorInfo::new("misaligned-data", "inputs and outputs must have equal rows")
                .with_context("x_rows", x.nrows())
                .with_context("y_rows", y.nrows()),
        ));
    }
    let Some(svf) = scalarize else {
        if y.ncols() != 1 {
            return Err(SvaError::Config(
                ErrorInfo::new("multi-output-target", "multi-output data needs a scalarization")
                    .with_context("outputs", y.ncols())
                    .with_hint("install LoopHooks::scalarize"),
            ));
        }
        return Ok(y.column(0).iter().map(|v| Some(*v)).collect());
    };

    let mut targets = vec![None; x.nrows()];
    let groups: Vec<Vec<usize>> = match task_column {
        None => vec![(0..x.nrows()).collect()],
        Some(col) => (0..n_modalities)
            .map(|m| {
                (0..x.nrows())
                    .filter(|i| as_index(x[(*i, col)]) == Some(m))
                    .collect()
            })
            .collect(),
    };
    for (modality, rows) in groups.iter().enumerate() {
        if rows.is_empty() {
            continue;
        }
        let values = svf(&take_rows(x, rows), &take_rows(y, rows))?;
        if values.len() != rows.len() {
            return Err(SvaError::Shape(
                ErrorInfo::new("scalarization-length", "scalarization must return one value per row")
                    .with_context("modality", modality)
                    .with_context("rows", rows.len())
                    .with_context("returned", values.len()),
            ));
        }
        for (row, value) in rows.iter().zip(values) {
            targets[*row] = Some(value);
        }
    }
    Ok(targets)
}

impl Experiment {
    /// Runs the loop with the built-in Gaussian process and acquisition
    /// optimizer.
    pub fn run_gp_experiment_default(
        &mut self,
        config: &LoopConfig,
        hooks: &LoopHooks,
    ) -> Result<LoopSummary, SvaError> {
        self.run_gp_experiment(config, hooks, &GpFitter::default(), &OptimizeAcqf)
    }

    /// Runs the loop until `config.budget` points have been acquired.
    ///
    /// Each iteration fits `fitter` to the current targets, asks `acquirer`
    /// for points in the experimental domain, observes them and appends a
    /// history record. Iteration indices continue from the history.
    pub fn run_gp_experiment<F, A>(
        &mut self,
        config: &LoopConfig,
        hooks: &LoopHooks,
        fitter: &F,
        acquirer: &A,
    ) -> Result<LoopSummary, SvaError>
    where
        F: SurrogateFitter,
        A: AcquisitionService<F::Model>,
    {
        if self.data().n() == 0 {
            return Err(SvaError::Precondition(
                ErrorInfo::new("uninitialized-data", "the loop needs initial observations")
                    .with_hint("call initialize_data first"),
            ));
        }
        if self.data().pending() != 0 {
            return Err(SvaError::Precondition(
                ErrorInfo::new("pending-outputs", "some inputs are missing outputs")
                    .with_context("pending", self.data().pending()),
            ));
        }
        let task = self.task_spec(config)?;
        let n_modalities = self.modality().n_modalities();
        let first_iteration = self.history().last_iteration().map_or(0, |ii| ii + 1);
        let mut summary = LoopSummary {
            first_iteration,
            last_iteration: None,
            iterations_run: 0,
            points_acquired: 0,
            n_observations: self.data().n(),
        };

        for ii in first_iteration..first_iteration + config.budget {
            if summary.points_acquired >= config.budget {
                break;
            }
            let (x, y) = match (self.data().x(), self.data().y()) {
                (Some(x), Some(y)) => (x.clone(), y.clone()),
                _ => {
                    return Err(SvaError::Precondition(ErrorInfo::new(
                        "uninitialized-data",
                        "the loop needs initial observations",
                    )))
                }
            };
            let targets = select_target(
                &x,
                &y,
                task.map(|spec| spec.column),
                n_modalities,
                hooks.scalarize.as_deref(),
            )?;
            let fit_rows: Vec<usize> = (0..targets.len()).filter(|i| targets[*i].is_some()).collect();
            if fit_rows.is_empty() {
                return Err(SvaError::Precondition(ErrorInfo::new(
                    "no-fit-targets",
                    "no row has a target to fit",
                )));
            }
            let x_fit = take_rows(&x, &fit_rows);
            let y_fit: Vec<f64> = targets.iter().flatten().copied().collect();
            let model = fitter.fit(&x_fit, &y_fit, task)?;

            let modality = (hooks.modality)(ii);
            let transform = PosteriorTransform::one_hot(n_modalities, modality)?;
            let mut hyperparameters = config.acquisition.hyperparameters.clone();
            if config.acquisition.family.is_expected_improvement() {
                let best_f = incumbent(&x_fit, &y_fit, task, modality);
                hyperparameters.insert(BEST_F.to_string(), best_f);
            }
            let request = AskRequest {
                family: config.acquisition.family,
                hyperparameters: &hyperparameters,
                transform: &transform,
                bounds: self.properties().experimental_domain(),
                settings: &config.optimizer,
                seed: derive_substream_seed(config.seed, ii as u64),
            };
            let outcome = acquirer.ask(&model, &request)?;
            let next_points = if task.is_some() {
                append_constant_column(&outcome.next_points, modality as f64)
            } else {
                outcome.next_points.clone()
            };
            let surrogate = ModelSnapshot::capture(&model)?;

            self.update_data(&next_points)?;
            self.history_mut().append(HistoryRecord {
                iteration: ii,
                next_points: next_points.clone(),
                value: outcome.value,
                modality,
                n_observations: x.nrows(),
                acquisition_function: outcome.acquisition_function,
                surrogate,
            });

            summary.last_iteration = Some(ii);
            summary.iterations_run += 1;
            summary.points_acquired += next_points.nrows();
            summary.n_observations = self.data().n();
            if config.progress {
                info!(
                    iteration = ii,
                    modality,
                    value = outcome.value,
                    observations = summary.n_observations,
                    "experiment iteration complete"
                );
            } else {
                debug!(
                    iteration = ii,
                    modality,
                    value = outcome.value,
                    observations = summary.n_observations,
                    "experiment iteration complete"
                );
            }
        }
        Ok(summary)
    }

    fn task_spec(&self, config: &LoopConfig) -> Result<Option<TaskSpec>, SvaError> {
        if !self.modality().is_multi() {
            return Ok(None);
        }
        let last = self.input_width() - 1;
        let column = config.task_feature.unwrap_or(last);
        if column != last {
            return Err(SvaError::Config(
                ErrorInfo::new("task-feature", "the modality must be the last input column")
                    .with_context("task_feature", column)
                    .with_context("expected", last),
            ));
        }
        Ok(Some(TaskSpec {
            column,
            n_tasks: self.modality().n_modalities(),
        }))
    }
}

/// Largest fitted target among rows of `modality`, or among all rows when
/// the modality has none.
fn incumbent(x: &DMatrix<f64>, y: &[f64], task: Option<TaskSpec>, modality: usize) -> f64 {
    let overall = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let Some(spec) = task else {
        return overall;
    };
    let within = (0..y.len())
        .filter(|i| as_index(x[(*i, spec.column)]) == Some(modality))
        .map(|i| y[i])
        .fold(f64::NEG_INFINITY, f64::max);
    if within.is_finite() {
        within
    } else {
        overall
    }
}
