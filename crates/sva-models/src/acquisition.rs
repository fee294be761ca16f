//! Acquisition families and the built-in acquisition service.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sva_core::array::from_rows;
use sva_core::{Domain, ErrorInfo, RngHandle, SvaError};
use tracing::debug;

use crate::optimize::maximize;
use crate::surrogate::{PosteriorTransform, Surrogate};

/// Hyperparameter name of the UCB exploration coefficient.
pub const BETA: &str = "beta";
/// Hyperparameter name of the incumbent value used by EI families.
pub const BEST_F: &str = "best_f";

/// Supported acquisition function families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionFamily {
    /// Upper confidence bound, `mean + sqrt(beta) * std`.
    #[serde(rename = "UCB")]
    Ucb,
    /// Expected improvement over `best_f`.
    #[serde(rename = "EI")]
    Ei,
    /// Batch upper confidence bound.
    #[serde(rename = "qUCB")]
    QUcb,
    /// Batch expected improvement.
    #[serde(rename = "qEI")]
    QEi,
}

impl AcquisitionFamily {
    /// Whether the family needs the incumbent `best_f`.
    pub fn is_expected_improvement(&self) -> bool {
        matches!(self, AcquisitionFamily::Ei | AcquisitionFamily::QEi)
    }

    /// Whether the family may propose more than one point per ask.
    pub fn is_batch(&self) -> bool {
        matches!(self, AcquisitionFamily::QUcb | AcquisitionFamily::QEi)
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionFamily::Ucb => "UCB",
            AcquisitionFamily::Ei => "EI",
            AcquisitionFamily::QUcb => "qUCB",
            AcquisitionFamily::QEi => "qEI",
        }
    }
}

impl fmt::Display for AcquisitionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionFamily {
    type Err = SvaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UCB" | "ucb" => Ok(AcquisitionFamily::Ucb),
            "EI" | "ei" => Ok(AcquisitionFamily::Ei),
            "qUCB" | "qucb" => Ok(AcquisitionFamily::QUcb),
            "qEI" | "qei" => Ok(AcquisitionFamily::QEi),
            other => Err(SvaError::Config(
                ErrorInfo::new("unknown-acquisition", "unsupported acquisition family")
                    .with_context("family", other)
                    .with_hint("expected one of UCB, EI, qUCB, qEI"),
            )),
        }
    }
}

/// Acquisition family and its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Acquisition family.
    #[serde(default = "default_family")]
    pub family: AcquisitionFamily,
    /// Family hyperparameters keyed by name (`beta`, `best_f`).
    #[serde(default = "default_hyperparameters")]
    pub hyperparameters: BTreeMap<String, f64>,
}

fn default_family() -> AcquisitionFamily {
    AcquisitionFamily::Ucb
}

fn default_hyperparameters() -> BTreeMap<String, f64> {
    [(BETA.to_string(), 10.0)].into_iter().collect()
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            family: default_family(),
            hyperparameters: default_hyperparameters(),
        }
    }
}

/// Settings forwarded to the acquisition optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Number of points proposed per ask.
    #[serde(default = "default_q")]
    pub q: usize,
    /// Number of refined starting points.
    #[serde(default = "default_num_restarts")]
    pub num_restarts: usize,
    /// Number of uniform candidates scored before refinement.
    #[serde(default = "default_raw_samples")]
    pub raw_samples: usize,
}

fn default_q() -> usize {
    1
}

fn default_num_restarts() -> usize {
    20
}

fn default_raw_samples() -> usize {
    100
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            q: default_q(),
            num_restarts: default_num_restarts(),
            raw_samples: default_raw_samples(),
        }
    }
}

/// Everything an acquisition service needs besides the model.
#[derive(Debug, Clone)]
pub struct AskRequest<'a> {
    /// Acquisition family.
    pub family: AcquisitionFamily,
    /// Hyperparameters of the family.
    pub hyperparameters: &'a BTreeMap<String, f64>,
    /// Weighting that reduces the model to one scalar output.
    pub transform: &'a PosteriorTransform,
    /// Feature bounds to search.
    pub bounds: &'a Domain,
    /// Optimizer settings.
    pub settings: &'a OptimizerSettings,
    /// Seed for the optimizer's random candidates.
    pub seed: u64,
}

/// Identifying description of the acquisition function used for an ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionState {
    /// Acquisition family.
    pub family: AcquisitionFamily,
    /// Hyperparameters in effect, including any incumbent value.
    pub hyperparameters: BTreeMap<String, f64>,
    /// Posterior transform weights.
    pub weights: Vec<f64>,
    /// Searched bounds.
    pub bounds: Domain,
    /// Batch size.
    pub q: usize,
    /// Optimizer seed.
    pub seed: u64,
}

/// Result of an ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskOutcome {
    /// Proposed points, feature columns only, one row per point.
    pub next_points: DMatrix<f64>,
    /// Acquisition value of the proposal; for batches, the sum of the
    /// greedy per-point values.
    pub value: f64,
    /// Acquisition function that produced the proposal.
    pub acquisition_function: AcquisitionState,
}

/// Service proposing the next points to evaluate from a fitted model.
pub trait AcquisitionService<M: Surrogate> {
    /// Proposes `request.settings.q` points.
    fn ask(&self, model: &M, request: &AskRequest<'_>) -> Result<AskOutcome, SvaError>;
}

/// Built-in acquisition service.
///
/// Each point maximizes the analytic criterion on the transformed posterior
/// with [`maximize`]. Batches are built greedily: after each pick the model
/// is conditioned on its own predicted mean at that point (kriging
/// believer) and EI's incumbent is raised accordingly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeAcqf;

impl<M: Surrogate> AcquisitionService<M> for OptimizeAcqf {
    fn ask(&self, model: &M, request: &AskRequest<'_>) -> Result<AskOutcome, SvaError> {
        let settings = request.settings;
        if request.bounds.dim() != model.n_features() {
            return Err(SvaError::Shape(
                ErrorInfo::new("bounds-width", "bounds must cover every model feature")
                    .with_context("bounds", request.bounds.dim())
                    .with_context("features", model.n_features()),
            ));
        }
        if settings.q == 0 {
            return Err(SvaError::config("batch-size", "q must be at least 1"));
        }
        if settings.q > 1 && !request.family.is_batch() {
            return Err(SvaError::Config(
                ErrorInfo::new("batch-requires-q-family", "analytic families propose one point")
                    .with_context("family", request.family)
                    .with_context("q", settings.q)
                    .with_hint("use qUCB or qEI for batches"),
            ));
        }
        let mut criterion = Criterion::new(request.family, request.hyperparameters)?;
        let task = request.transform.dominant_task();
        let mut rng = RngHandle::from_seed(request.seed);
        let mut current = model.clone();
        let mut points = Vec::with_capacity(settings.q);
        let mut total = 0.0;

        for k in 0..settings.q {
            let (point, value) = maximize(
                |p| {
                    let features = DMatrix::from_row_slice(1, p.len(), p);
                    let pred = current.posterior(&features, request.transform)?;
                    Ok(criterion.score(pred.mean[0], pred.variance[0]))
                },
                request.bounds,
                settings.num_restarts,
                settings.raw_samples,
                &mut rng,
            )?;
            if !value.is_finite() {
                return Err(SvaError::Acquisition(
                    ErrorInfo::new("non-finite-acquisition", "acquisition value is not finite")
                        .with_context("family", request.family)
                        .with_context("point", k),
                ));
            }
            total += value;
            if k + 1 < settings.q {
                let features = DMatrix::from_row_slice(1, point.len(), &point);
                let believed = current.posterior(&features, request.transform)?.mean[0];
                current = current.fantasize(&features, task, &[believed])?;
                criterion.raise_incumbent(believed);
            }
            points.push(point);
        }

        let next_points = from_rows(&points)?;
        debug!(
            family = %request.family,
            q = settings.q,
            value = total,
            "acquisition proposed points"
        );
        Ok(AskOutcome {
            next_points,
            value: total,
            acquisition_function: AcquisitionState {
                family: request.family,
                hyperparameters: request.hyperparameters.clone(),
                weights: request.transform.weights().to_vec(),
                bounds: request.bounds.clone(),
                q: settings.q,
                seed: request.seed,
            },
        })
    }
}

/// Analytic acquisition criterion evaluated from predictive moments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criterion {
    family: AcquisitionFamily,
    beta: f64,
    best_f: f64,
}

impl Criterion {
    /// Builds the criterion of `family` from named hyperparameters.
    pub fn new(
        family: AcquisitionFamily,
        hyperparameters: &BTreeMap<String, f64>,
    ) -> Result<Self, SvaError> {
        let require = |name: &str| {
            hyperparameters.get(name).copied().ok_or_else(|| {
                SvaError::Config(
                    ErrorInfo::new("missing-hyperparameter", "acquisition hyperparameter missing")
                        .with_context("family", family)
                        .with_context("name", name),
                )
            })
        };
        let (beta, best_f) = if family.is_expected_improvement() {
            (0.0, require(BEST_F)?)
        } else {
            (require(BETA)?, 0.0)
        };
        if beta < 0.0 || !beta.is_finite() || !best_f.is_finite() {
            return Err(SvaError::Config(
                ErrorInfo::new("invalid-hyperparameter", "hyperparameters must be finite")
                    .with_context("beta", beta)
                    .with_context("best_f", best_f),
            ));
        }
        Ok(Self {
            family,
            beta,
            best_f,
        })
    }

    /// Criterion value at a point with predictive `mean` and `variance`.
    pub fn score(&self, mean: f64, variance: f64) -> f64 {
        let std = variance.max(0.0).sqrt();
        if self.family.is_expected_improvement() {
            expected_improvement(mean, std, self.best_f)
        } else {
            mean + self.beta.sqrt() * std
        }
    }

    fn raise_incumbent(&mut self, value: f64) {
        if self.family.is_expected_improvement() {
            self.best_f = self.best_f.max(value);
        }
    }
}

/// `EI(x) = (mean - best_f) Phi(z) + std phi(z)` with `z = (mean - best_f) / std`.
fn expected_improvement(mean: f64, std: f64, best_f: f64) -> f64 {
    if std < 1e-12 {
        return (mean - best_f).max(0.0);
    }
    let z = (mean - best_f) / std;
    ((mean - best_f) * norm_cdf(z) + std * norm_pdf(z)).max(0.0)
}

fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    let tail = norm_pdf(x.abs()) * poly;
    if x >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}
