//! Multi-task Gaussian process surrogate.
//!
//! The kernel is a squared exponential over features (each dimension scaled
//! by the training span) multiplied by an intrinsic coregionalization task
//! kernel `B = (1 - rho) I + rho 11^T`. Targets are standardized before
//! fitting; predictions are reported on the original scale. A single-task
//! model is the `n_tasks == 1` case with no task column.

use std::f64::consts::PI;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use sva_core::array::{as_index, vstack, without_column};
use sva_core::{Domain, ErrorInfo, RngHandle, SvaError};
use tracing::debug;

use crate::optimize::maximize;
use crate::surrogate::{PosteriorTransform, Prediction, Surrogate, SurrogateFitter, TaskSpec};

/// Snapshot label of [`GaussianProcess`].
pub const GP_KIND: &str = "multi-task-gp";

const LENGTHSCALE_GRID: [f64; 8] = [0.05, 0.1, 0.2, 0.35, 0.5, 0.75, 1.0, 1.5];
const NOISE_GRID: [f64; 4] = [1e-6, 1e-4, 1e-2, 1e-1];
const CORRELATION_GRID: [f64; 4] = [0.0, 0.5, 0.8, 0.95];
const SAMPLE_JITTER: [f64; 3] = [1e-8, 1e-6, 1e-4];

/// Kernel hyperparameters, expressed on normalized features and
/// standardized targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpHyperparameters {
    /// Shared lengthscale relative to the training span of each feature.
    pub lengthscale: f64,
    /// Off-diagonal correlation of the task kernel, in `[0, 1)`.
    pub task_correlation: f64,
    /// Observation noise variance added to the kernel diagonal.
    pub noise_variance: f64,
    /// Prior variance of the latent function.
    pub signal_variance: f64,
}

impl Default for GpHyperparameters {
    fn default() -> Self {
        Self {
            lengthscale: 0.3,
            task_correlation: 0.5,
            noise_variance: 1e-3,
            signal_variance: 1.0,
        }
    }
}

/// How hyperparameters are chosen when fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TrainProtocol {
    /// Exhaustive search of a fixed grid for the best log marginal likelihood.
    Mll,
    /// Adam ascent on the log marginal likelihood in log-parameter space.
    Adam {
        /// Step size.
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        /// Number of ascent steps.
        #[serde(default = "default_epochs")]
        epochs: usize,
    },
}

fn default_learning_rate() -> f64 {
    0.05
}

fn default_epochs() -> usize {
    200
}

impl TrainProtocol {
    /// Adam with default step size and epoch count.
    pub fn adam() -> Self {
        TrainProtocol::Adam {
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
        }
    }
}

impl Default for TrainProtocol {
    fn default() -> Self {
        TrainProtocol::Mll
    }
}

impl FromStr for TrainProtocol {
    type Err = SvaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mll" => Ok(TrainProtocol::Mll),
            "Adam" | "adam" => Ok(TrainProtocol::adam()),
            other => Err(SvaError::Config(
                ErrorInfo::new("unknown-train-protocol", "train_with must be one of Adam or mll")
                    .with_context("train_with", other),
            )),
        }
    }
}

/// Built-in [`SurrogateFitter`] producing [`GaussianProcess`] models.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpFitter {
    /// Hyperparameter selection protocol.
    #[serde(default)]
    pub protocol: TrainProtocol,
}

impl GpFitter {
    /// Fitter using the given protocol.
    pub fn new(protocol: TrainProtocol) -> Self {
        Self { protocol }
    }
}

impl SurrogateFitter for GpFitter {
    type Model = GaussianProcess;

    fn fit(
        &self,
        x: &DMatrix<f64>,
        y: &[f64],
        task: Option<TaskSpec>,
    ) -> Result<GaussianProcess, SvaError> {
        GaussianProcess::fit(x, y, task, &self.protocol)
    }
}

/// Fitted Gaussian process over features and an optional task index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianProcess {
    features: DMatrix<f64>,
    tasks: Vec<usize>,
    task: Option<TaskSpec>,
    n_tasks: usize,
    scale: Vec<f64>,
    y_train: Vec<f64>,
    y_mean: f64,
    y_std: f64,
    hyper: GpHyperparameters,
    chol: DMatrix<f64>,
    alpha: Vec<f64>,
    log_marginal_likelihood: f64,
}

struct Factorization {
    chol: DMatrix<f64>,
    alpha: Vec<f64>,
    lml: f64,
}

impl GaussianProcess {
    /// Fits a model to `x` (task column included when `task` is set) and
    /// targets `y`.
    pub fn fit(
        x: &DMatrix<f64>,
        y: &[f64],
        task: Option<TaskSpec>,
        protocol: &TrainProtocol,
    ) -> Result<Self, SvaError> {
        if x.nrows() == 0 {
            return Err(SvaError::Model(ErrorInfo::new(
                "empty-training-set",
                "cannot fit a surrogate without observations",
            )));
        }
        if x.nrows() != y.len() {
            return Err(SvaError::Shape(
                ErrorInfo::new("target-length", "one target per input row is required")
                    .with_context("rows", x.nrows())
                    .with_context("targets", y.len()),
            ));
        }
        if let Some(idx) = y.iter().position(|v| !v.is_finite()) {
            return Err(SvaError::Model(
                ErrorInfo::new("non-finite-target", "targets must be finite")
                    .with_context("row", idx),
            ));
        }
        let (features, tasks, n_tasks) = split_tasks(x, task)?;
        let scale: Vec<f64> = (0..features.ncols())
            .map(|j| {
                let column = features.column(j);
                let span = column.max() - column.min();
                if span > 1e-12 {
                    span
                } else {
                    1.0
                }
            })
            .collect();

        let n = y.len() as f64;
        let y_mean = y.iter().sum::<f64>() / n;
        let y_var = if y.len() > 1 {
            y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        let y_std = if y_var.sqrt() > 1e-12 { y_var.sqrt() } else { 1.0 };
        let y_train: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();

        let mut model = Self {
            features,
            tasks,
            task,
            n_tasks,
            scale,
            y_train,
            y_mean,
            y_std,
            hyper: GpHyperparameters::default(),
            chol: DMatrix::zeros(0, 0),
            alpha: Vec::new(),
            log_marginal_likelihood: f64::NEG_INFINITY,
        };
        let hyper = match protocol {
            TrainProtocol::Mll => model.grid_search()?,
            TrainProtocol::Adam {
                learning_rate,
                epochs,
            } => model.adam(*learning_rate, *epochs)?,
        };
        model.refactor(hyper)?;
        debug!(
            n_train = model.y_train.len(),
            n_tasks = model.n_tasks,
            lengthscale = hyper.lengthscale,
            noise = hyper.noise_variance,
            lml = model.log_marginal_likelihood,
            "fitted gaussian process"
        );
        Ok(model)
    }

    /// Selected hyperparameters.
    pub fn hyperparameters(&self) -> &GpHyperparameters {
        &self.hyper
    }

    /// Log marginal likelihood of the standardized training targets.
    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    /// Number of training rows, pseudo observations included.
    pub fn n_train(&self) -> usize {
        self.y_train.len()
    }

    /// Draws one joint posterior sample at full input rows.
    pub fn sample_posterior(&self, x: &DMatrix<f64>, seed: u64) -> Result<Vec<f64>, SvaError> {
        let (features, tasks) = self.split_query(x)?;
        let rows = matrix_rows(&features);
        let train = matrix_rows(&self.features);
        let m = rows.len();
        let mut cross = DMatrix::zeros(train.len(), m);
        for (j, row) in rows.iter().enumerate() {
            for (i, t_row) in train.iter().enumerate() {
                cross[(i, j)] = self.covariance(t_row, self.tasks[i], row, tasks[j]);
            }
        }
        let solved = self.chol.solve_lower_triangular(&cross).ok_or_else(|| {
            SvaError::Model(ErrorInfo::new("triangular-solve", "posterior solve failed"))
        })?;
        let mut cov = DMatrix::from_fn(m, m, |a, b| {
            self.covariance(&rows[a], tasks[a], &rows[b], tasks[b])
        });
        cov -= solved.transpose() * &solved;
        let alpha = DVector::from_column_slice(&self.alpha);
        let mean_std = cross.transpose() * alpha;

        let factor = SAMPLE_JITTER
            .iter()
            .find_map(|jitter| {
                let mut jittered = cov.clone();
                for i in 0..m {
                    jittered[(i, i)] += jitter;
                }
                nalgebra::Cholesky::new(jittered).map(|c| c.l())
            })
            .ok_or_else(|| {
                SvaError::Model(
                    ErrorInfo::new("posterior-covariance", "posterior covariance is not PSD")
                        .with_context("points", m),
                )
            })?;

        let mut rng = RngHandle::from_seed(seed);
        let z = DVector::from_fn(m, |_, _| rng.sample::<f64, _>(StandardNormal));
        let draw = mean_std + factor * z;
        Ok(draw.iter().map(|v| self.y_mean + self.y_std * v).collect())
    }

    /// Maximizes the posterior mean of `task` over `domain`.
    pub fn optimize_mean(
        &self,
        domain: &Domain,
        task: usize,
        num_restarts: usize,
        raw_samples: usize,
        seed: u64,
    ) -> Result<(Vec<f64>, f64), SvaError> {
        let transform = if self.n_tasks == 1 {
            PosteriorTransform::single()
        } else {
            PosteriorTransform::one_hot(self.n_tasks, task)?
        };
        let mut rng = RngHandle::from_seed(seed);
        maximize(
            |point| {
                let features = DMatrix::from_row_slice(1, point.len(), point);
                Ok(self.posterior(&features, &transform)?.mean[0])
            },
            domain,
            num_restarts,
            raw_samples,
            &mut rng,
        )
    }

    fn covariance(&self, a: &[f64], ta: usize, b: &[f64], tb: usize) -> f64 {
        kernel(&self.hyper, &self.scale, a, ta, b, tb)
    }

    fn factorize(&self, hyper: &GpHyperparameters) -> Option<Factorization> {
        let rows = matrix_rows(&self.features);
        let n = rows.len();
        let k = DMatrix::from_fn(n, n, |i, j| {
            let value = kernel(hyper, &self.scale, &rows[i], self.tasks[i], &rows[j], self.tasks[j]);
            if i == j {
                value + hyper.noise_variance
            } else {
                value
            }
        });
        let chol = nalgebra::Cholesky::new(k)?.l();
        let y = DVector::from_column_slice(&self.y_train);
        let half = chol.solve_lower_triangular(&y)?;
        let alpha = chol.tr_solve_lower_triangular(&half)?;
        let log_det: f64 = (0..n).map(|i| chol[(i, i)].ln()).sum();
        let lml = -0.5 * y.dot(&alpha) - log_det - 0.5 * n as f64 * (2.0 * PI).ln();
        if !lml.is_finite() {
            return None;
        }
        Some(Factorization {
            chol,
            alpha: alpha.iter().copied().collect(),
            lml,
        })
    }

    fn refactor(&mut self, hyper: GpHyperparameters) -> Result<(), SvaError> {
        let factorization = self.factorize(&hyper).ok_or_else(|| {
            SvaError::Model(
                ErrorInfo::new("cholesky", "kernel matrix is not positive definite")
                    .with_context("n_train", self.y_train.len())
                    .with_context("noise_variance", hyper.noise_variance),
            )
        })?;
        self.hyper = hyper;
        self.chol = factorization.chol;
        self.alpha = factorization.alpha;
        self.log_marginal_likelihood = factorization.lml;
        Ok(())
    }

    fn grid_search(&self) -> Result<GpHyperparameters, SvaError> {
        let correlations: &[f64] = if self.n_tasks > 1 {
            &CORRELATION_GRID
        } else {
            &CORRELATION_GRID[..1]
        };
        let mut best: Option<(f64, GpHyperparameters)> = None;
        for &lengthscale in &LENGTHSCALE_GRID {
            for &noise_variance in &NOISE_GRID {
                for &task_correlation in correlations {
                    let hyper = GpHyperparameters {
                        lengthscale,
                        task_correlation,
                        noise_variance,
                        signal_variance: 1.0,
                    };
                    if let Some(fact) = self.factorize(&hyper) {
                        if best.map_or(true, |(lml, _)| fact.lml > lml) {
                            best = Some((fact.lml, hyper));
                        }
                    }
                }
            }
        }
        best.map(|(_, hyper)| hyper).ok_or_else(|| {
            SvaError::Model(
                ErrorInfo::new("mll-grid", "no grid point produced a valid factorization")
                    .with_context("n_train", self.y_train.len()),
            )
        })
    }

    fn adam(&self, learning_rate: f64, epochs: usize) -> Result<GpHyperparameters, SvaError> {
        const BETA1: f64 = 0.9;
        const BETA2: f64 = 0.999;
        const EPS: f64 = 1e-8;
        const STEP: f64 = 1e-4;

        let multi = self.n_tasks > 1;
        let start = GpHyperparameters::default();
        let mut theta = vec![start.lengthscale.ln(), start.noise_variance.ln()];
        if multi {
            theta.push(logit(start.task_correlation));
        }
        let objective = |theta: &[f64]| -> f64 {
            self.factorize(&unpack(theta, multi))
                .map(|f| f.lml)
                .unwrap_or(f64::NEG_INFINITY)
        };

        let mut m = vec![0.0; theta.len()];
        let mut v = vec![0.0; theta.len()];
        let mut best = (objective(&theta), theta.clone());
        for epoch in 1..=epochs {
            let mut grad = vec![0.0; theta.len()];
            for k in 0..theta.len() {
                let mut up = theta.clone();
                let mut down = theta.clone();
                up[k] += STEP;
                down[k] -= STEP;
                grad[k] = (objective(&up) - objective(&down)) / (2.0 * STEP);
            }
            if grad.iter().any(|g| !g.is_finite()) {
                break;
            }
            for k in 0..theta.len() {
                m[k] = BETA1 * m[k] + (1.0 - BETA1) * grad[k];
                v[k] = BETA2 * v[k] + (1.0 - BETA2) * grad[k] * grad[k];
                let m_hat = m[k] / (1.0 - BETA1.powi(epoch as i32));
                let v_hat = v[k] / (1.0 - BETA2.powi(epoch as i32));
                theta[k] += learning_rate * m_hat / (v_hat.sqrt() + EPS);
            }
            clamp_theta(&mut theta);
            let value = objective(&theta);
            if value > best.0 {
                best = (value, theta.clone());
            }
        }
        if !best.0.is_finite() {
            return Err(SvaError::Model(
                ErrorInfo::new("adam-diverged", "no iterate produced a valid factorization")
                    .with_context("epochs", epochs),
            ));
        }
        Ok(unpack(&best.1, multi))
    }

    fn split_query(&self, x: &DMatrix<f64>) -> Result<(DMatrix<f64>, Vec<usize>), SvaError> {
        match self.task {
            Some(spec) => {
                let (features, tasks, _) = split_tasks(x, Some(spec))?;
                if features.ncols() != self.n_features() {
                    return Err(feature_mismatch(self.n_features() + 1, x.ncols()));
                }
                Ok((features, tasks))
            }
            None => {
                if x.ncols() != self.n_features() {
                    return Err(feature_mismatch(self.n_features(), x.ncols()));
                }
                Ok((x.clone(), vec![0; x.nrows()]))
            }
        }
    }

    fn moments(&self, point: &[f64], weights: &[(usize, f64)]) -> Result<(f64, f64), SvaError> {
        let train = self.features.nrows();
        let kw = DVector::from_fn(train, |i, _| {
            let row: Vec<f64> = self.features.row(i).iter().copied().collect();
            weights
                .iter()
                .map(|(t, w)| w * self.covariance(point, *t, &row, self.tasks[i]))
                .sum::<f64>()
        });
        let mean_std: f64 = kw.iter().zip(self.alpha.iter()).map(|(k, a)| k * a).sum();
        let mut prior = 0.0;
        for (ta, wa) in weights {
            for (tb, wb) in weights {
                prior += wa * wb * self.covariance(point, *ta, point, *tb);
            }
        }
        let v = self.chol.solve_lower_triangular(&kw).ok_or_else(|| {
            SvaError::Model(ErrorInfo::new("triangular-solve", "predictive solve failed"))
        })?;
        let weight_sum: f64 = weights.iter().map(|(_, w)| w).sum();
        let mean = self.y_mean * weight_sum + self.y_std * mean_std;
        let variance = self.y_std * self.y_std * (prior - v.dot(&v)).max(0.0);
        Ok((mean, variance))
    }
}

impl Surrogate for GaussianProcess {
    fn kind(&self) -> &'static str {
        GP_KIND
    }

    fn n_tasks(&self) -> usize {
        self.n_tasks
    }

    fn n_features(&self) -> usize {
        self.features.ncols()
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<Prediction, SvaError> {
        let (features, tasks) = self.split_query(x)?;
        let mut mean = Vec::with_capacity(features.nrows());
        let mut variance = Vec::with_capacity(features.nrows());
        for (i, task) in tasks.iter().enumerate() {
            let point: Vec<f64> = features.row(i).iter().copied().collect();
            let (mu, var) = self.moments(&point, &[(*task, 1.0)])?;
            mean.push(mu);
            variance.push(var);
        }
        Ok(Prediction { mean, variance })
    }

    fn posterior(
        &self,
        features: &DMatrix<f64>,
        transform: &PosteriorTransform,
    ) -> Result<Prediction, SvaError> {
        if features.ncols() != self.n_features() {
            return Err(feature_mismatch(self.n_features(), features.ncols()));
        }
        if transform.weights().len() != self.n_tasks {
            return Err(SvaError::Shape(
                ErrorInfo::new("transform-length", "one weight per task is required")
                    .with_context("weights", transform.weights().len())
                    .with_context("n_tasks", self.n_tasks),
            ));
        }
        let weights: Vec<(usize, f64)> = transform
            .weights()
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, w)| *w != 0.0)
            .collect();
        let mut mean = Vec::with_capacity(features.nrows());
        let mut variance = Vec::with_capacity(features.nrows());
        for i in 0..features.nrows() {
            let point: Vec<f64> = features.row(i).iter().copied().collect();
            let (mu, var) = self.moments(&point, &weights)?;
            mean.push(mu);
            variance.push(var);
        }
        Ok(Prediction { mean, variance })
    }

    fn fantasize(
        &self,
        features: &DMatrix<f64>,
        task: usize,
        values: &[f64],
    ) -> Result<Self, SvaError> {
        if features.nrows() != values.len() || features.ncols() != self.n_features() {
            return Err(SvaError::Shape(
                ErrorInfo::new("fantasy-shape", "fantasy rows must match values and features")
                    .with_context("rows", features.nrows())
                    .with_context("values", values.len())
                    .with_context("columns", features.ncols()),
            ));
        }
        if task >= self.n_tasks {
            return Err(SvaError::Config(
                ErrorInfo::new("task-index", "fantasy task does not exist")
                    .with_context("task", task)
                    .with_context("n_tasks", self.n_tasks),
            ));
        }
        let mut next = self.clone();
        next.features = vstack(&self.features, features)?;
        next.tasks.extend(std::iter::repeat(task).take(values.len()));
        next.y_train
            .extend(values.iter().map(|v| (v - self.y_mean) / self.y_std));
        next.refactor(self.hyper)?;
        Ok(next)
    }
}

fn kernel(
    hyper: &GpHyperparameters,
    scale: &[f64],
    a: &[f64],
    ta: usize,
    b: &[f64],
    tb: usize,
) -> f64 {
    let mut r_sq = 0.0;
    for j in 0..a.len() {
        let diff = (a[j] - b[j]) / (scale[j] * hyper.lengthscale);
        r_sq += diff * diff;
    }
    let coupling = if ta == tb {
        1.0
    } else {
        hyper.task_correlation
    };
    hyper.signal_variance * (-0.5 * r_sq).exp() * coupling
}

fn split_tasks(
    x: &DMatrix<f64>,
    task: Option<TaskSpec>,
) -> Result<(DMatrix<f64>, Vec<usize>, usize), SvaError> {
    let Some(spec) = task else {
        return Ok((x.clone(), vec![0; x.nrows()], 1));
    };
    if spec.column >= x.ncols() || spec.n_tasks == 0 {
        return Err(SvaError::Config(
            ErrorInfo::new("task-column", "task column must exist and n_tasks must be positive")
                .with_context("column", spec.column)
                .with_context("columns", x.ncols())
                .with_context("n_tasks", spec.n_tasks),
        ));
    }
    let mut tasks = Vec::with_capacity(x.nrows());
    for i in 0..x.nrows() {
        let raw = x[(i, spec.column)];
        match as_index(raw) {
            Some(idx) if idx < spec.n_tasks => tasks.push(idx),
            _ => {
                return Err(SvaError::Model(
                    ErrorInfo::new("task-index", "task column holds an unknown task")
                        .with_context("row", i)
                        .with_context("value", raw)
                        .with_context("n_tasks", spec.n_tasks),
                ))
            }
        }
    }
    Ok((without_column(x, spec.column), tasks, spec.n_tasks))
}

fn feature_mismatch(expected: usize, found: usize) -> SvaError {
    SvaError::Shape(
        ErrorInfo::new("feature-columns", "query width does not match the model")
            .with_context("expected", expected)
            .with_context("found", found),
    )
}

fn matrix_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn clamp_theta(theta: &mut [f64]) {
    theta[0] = theta[0].clamp(1e-3f64.ln(), 1e2f64.ln());
    theta[1] = theta[1].clamp(1e-8f64.ln(), 0.0);
    if let Some(z) = theta.get_mut(2) {
        *z = z.clamp(-6.0, 6.0);
    }
}

fn unpack(theta: &[f64], multi: bool) -> GpHyperparameters {
    GpHyperparameters {
        lengthscale: theta[0].exp(),
        noise_variance: theta[1].exp(),
        task_correlation: if multi { sigmoid(theta[2]) } else { 0.0 },
        signal_variance: 1.0,
    }
}
