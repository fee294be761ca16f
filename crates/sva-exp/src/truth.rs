//! Truth functions and the registry used to rebuild them from saved state.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use nalgebra::DMatrix;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sva_core::array::as_index;
use sva_core::{ErrorInfo, SvaError};

use crate::dream::DreamedTruth;

/// Function under study, real or simulated.
///
/// A truth is identified by its `name` and `params`; together they are
/// enough for a [`TruthRegistry`] to rebuild it after loading.
pub trait Truth: Debug + Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Parameters needed to rebuild this truth.
    fn params(&self) -> Result<Value, SvaError>;

    /// Outputs at input rows `x`, one row per input.
    fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError>;

    /// Flattened Jacobian at input rows `x`: column `o * n_input + j` holds
    /// the derivative of output `o` with respect to input `j`.
    fn derivative(&self, _x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        Err(derivative_unsupported(self.name()))
    }
}

/// Error returned by truths without a derivative.
pub fn derivative_unsupported(name: &str) -> SvaError {
    SvaError::Config(
        ErrorInfo::new("derivative-unsupported", "truth function has no derivative")
            .with_context("truth", name),
    )
}

/// Name and parameters of a truth, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthDescriptor {
    /// Registry name.
    pub name: String,
    /// Parameters passed to the registered constructor.
    pub params: Value,
}

impl TruthDescriptor {
    /// Describes `truth`.
    pub fn of(truth: &dyn Truth) -> Result<Self, SvaError> {
        Ok(Self {
            name: truth.name().to_string(),
            params: truth.params()?,
        })
    }
}

/// Constructor registered for a truth name.
pub type TruthConstructor = fn(&Value) -> Result<Arc<dyn Truth>, SvaError>;

/// Maps truth names to constructors.
#[derive(Clone, Default)]
pub struct TruthRegistry {
    constructors: BTreeMap<String, TruthConstructor>,
}

impl fmt::Debug for TruthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

impl TruthRegistry {
    /// Registry without entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every built-in truth.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(LinearTruth::NAME, build::<LinearTruth>);
        registry.register(SinusoidTruth::NAME, build::<SinusoidTruth>);
        registry.register(NegatedSphereTruth::NAME, build::<NegatedSphereTruth>);
        registry.register(MultiFidelitySinusoid::NAME, build::<MultiFidelitySinusoid>);
        registry.register(DreamedTruth::NAME, build::<DreamedTruth>);
        registry
    }

    /// Registers or replaces the constructor for `name`.
    pub fn register(&mut self, name: impl Into<String>, constructor: TruthConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Rebuilds the truth described by `descriptor`.
    pub fn build(&self, descriptor: &TruthDescriptor) -> Result<Arc<dyn Truth>, SvaError> {
        let constructor = self.constructors.get(&descriptor.name).ok_or_else(|| {
            SvaError::Config(
                ErrorInfo::new("unknown-truth", "no constructor registered for truth")
                    .with_context("truth", &descriptor.name)
                    .with_hint("register the truth before loading"),
            )
        })?;
        constructor(&descriptor.params)
    }
}

fn build<T>(params: &Value) -> Result<Arc<dyn Truth>, SvaError>
where
    T: Truth + DeserializeOwned + 'static,
{
    let truth: T = serde_json::from_value(params.clone())
        .map_err(|err| SvaError::serde("truth-params", err))?;
    Ok(Arc::new(truth))
}

fn to_params<T: Serialize>(value: &T) -> Result<Value, SvaError> {
    serde_json::to_value(value).map_err(|err| SvaError::serde("truth-params", err))
}

fn expect_width(name: &str, x: &DMatrix<f64>, expected: usize) -> Result<(), SvaError> {
    if x.ncols() == expected {
        Ok(())
    } else {
        Err(SvaError::Shape(
            ErrorInfo::new("truth-input-width", "truth received the wrong number of columns")
                .with_context("truth", name)
                .with_context("expected", expected)
                .with_context("found", x.ncols()),
        ))
    }
}

/// `y = x . weights + bias`, one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTruth {
    /// One weight per input.
    pub weights: Vec<f64>,
    /// Constant offset.
    #[serde(default)]
    pub bias: f64,
}

impl LinearTruth {
    /// Registry name.
    pub const NAME: &'static str = "linear";

    /// Linear truth with the given weights and bias.
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }
}

impl Truth for LinearTruth {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Result<Value, SvaError> {
        to_params(self)
    }

    fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        expect_width(Self::NAME, x, self.weights.len())?;
        Ok(DMatrix::from_fn(x.nrows(), 1, |i, _| {
            self.bias
                + x.row(i)
                    .iter()
                    .zip(self.weights.iter())
                    .map(|(v, w)| v * w)
                    .sum::<f64>()
        }))
    }

    fn derivative(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        expect_width(Self::NAME, x, self.weights.len())?;
        Ok(DMatrix::from_fn(x.nrows(), self.weights.len(), |_, j| {
            self.weights[j]
        }))
    }
}

/// `y = amplitude * sum_j sin(frequency * x_j + phase)`, one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinusoidTruth {
    /// Number of inputs.
    pub n_input_dim: usize,
    /// Angular frequency.
    pub frequency: f64,
    /// Amplitude.
    #[serde(default = "unit")]
    pub amplitude: f64,
    /// Phase shift.
    #[serde(default)]
    pub phase: f64,
}

fn unit() -> f64 {
    1.0
}

impl SinusoidTruth {
    /// Registry name.
    pub const NAME: &'static str = "sinusoid";

    /// Unit amplitude sinusoid without phase shift.
    pub fn new(n_input_dim: usize, frequency: f64) -> Self {
        Self {
            n_input_dim,
            frequency,
            amplitude: 1.0,
            phase: 0.0,
        }
    }
}

impl Truth for SinusoidTruth {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Result<Value, SvaError> {
        to_params(self)
    }

    fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        expect_width(Self::NAME, x, self.n_input_dim)?;
        Ok(DMatrix::from_fn(x.nrows(), 1, |i, _| {
            self.amplitude
                * x.row(i)
                    .iter()
                    .map(|v| (self.frequency * v + self.phase).sin())
                    .sum::<f64>()
        }))
    }

    fn derivative(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        expect_width(Self::NAME, x, self.n_input_dim)?;
        Ok(DMatrix::from_fn(x.nrows(), self.n_input_dim, |i, j| {
            self.amplitude * self.frequency * (self.frequency * x[(i, j)] + self.phase).cos()
        }))
    }
}

/// `y = -sum_j (x_j - center_j)^2`, maximized at `center`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegatedSphereTruth {
    /// Location of the maximum.
    pub center: Vec<f64>,
}

impl NegatedSphereTruth {
    /// Registry name.
    pub const NAME: &'static str = "negated-sphere";

    /// Sphere centered at `center`.
    pub fn new(center: Vec<f64>) -> Self {
        Self { center }
    }
}

impl Truth for NegatedSphereTruth {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Result<Value, SvaError> {
        to_params(self)
    }

    fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        expect_width(Self::NAME, x, self.center.len())?;
        Ok(DMatrix::from_fn(x.nrows(), 1, |i, _| {
            -x.row(i)
                .iter()
                .zip(self.center.iter())
                .map(|(v, c)| (v - c).powi(2))
                .sum::<f64>()
        }))
    }

    fn derivative(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        expect_width(Self::NAME, x, self.center.len())?;
        Ok(DMatrix::from_fn(x.nrows(), self.center.len(), |i, j| {
            -2.0 * (x[(i, j)] - self.center[j])
        }))
    }
}

/// Sinusoid observed through several fidelities.
///
/// Input rows carry the fidelity index in their last column. Fidelity `m`
/// returns `damping[m] * sum_j sin(frequency * x_j) + offsets[m]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiFidelitySinusoid {
    /// Number of inputs, excluding the fidelity column.
    pub n_input_dim: usize,
    /// Angular frequency shared by all fidelities.
    pub frequency: f64,
    /// Additive bias per fidelity.
    pub offsets: Vec<f64>,
    /// Multiplicative damping per fidelity.
    pub damping: Vec<f64>,
}

impl MultiFidelitySinusoid {
    /// Registry name.
    pub const NAME: &'static str = "multi-fidelity-sinusoid";

    /// Fidelity 0 is exact; fidelity `m` is damped by `1 / (1 + m)` and
    /// shifted by `-0.25 m`.
    pub fn new(n_input_dim: usize, n_modalities: usize, frequency: f64) -> Self {
        Self {
            n_input_dim,
            frequency,
            offsets: (0..n_modalities).map(|m| -0.25 * m as f64).collect(),
            damping: (0..n_modalities).map(|m| 1.0 / (1.0 + m as f64)).collect(),
        }
    }

    /// Number of fidelities.
    pub fn n_modalities(&self) -> usize {
        self.offsets.len().min(self.damping.len())
    }
}

impl Truth for MultiFidelitySinusoid {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Result<Value, SvaError> {
        to_params(self)
    }

    fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        expect_width(Self::NAME, x, self.n_input_dim + 1)?;
        let mut out = DMatrix::zeros(x.nrows(), 1);
        for i in 0..x.nrows() {
            let raw = x[(i, self.n_input_dim)];
            let m = match as_index(raw) {
                Some(m) if m < self.n_modalities() => m,
                _ => {
                    return Err(SvaError::Domain(
                        ErrorInfo::new("fidelity-index", "row names an unknown fidelity")
                            .with_context("row", i)
                            .with_context("value", raw)
                            .with_context("n_modalities", self.n_modalities()),
                    ))
                }
            };
            let signal: f64 = (0..self.n_input_dim)
                .map(|j| (self.frequency * x[(i, j)]).sin())
                .sum();
            out[(i, 0)] = self.damping[m] * signal + self.offsets[m];
        }
        Ok(out)
    }
}
