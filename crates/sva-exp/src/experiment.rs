//! Experiment capability: validated truth evaluation, sampling and data
//! accumulation for single and multi-modal experiments.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sva_core::array::{append_constant_column, linspace, vstack};
use sva_core::{derive_substream_seed, Domain, ErrorInfo, RngHandle, SvaError};
use tracing::debug;

use crate::data::ExperimentData;
use crate::history::ExperimentHistory;
use crate::noise::NoiseModel;
use crate::properties::ExperimentProperties;
use crate::truth::Truth;

/// Number of modalities an experiment observes.
///
/// Multi-modal experiments take one extra input column holding the
/// modality index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Modality {
    /// One source of observations.
    #[default]
    Single,
    /// Several sources sharing one input space.
    Multi {
        /// Number of modalities, at least 1.
        n_modalities: usize,
    },
}

impl Modality {
    /// Multi-modal flag for `n_modalities` sources.
    pub fn multi(n_modalities: usize) -> Result<Self, SvaError> {
        if n_modalities == 0 {
            return Err(SvaError::Config(ErrorInfo::new(
                "zero-modalities",
                "a multi-modal experiment needs at least one modality",
            )));
        }
        Ok(Modality::Multi { n_modalities })
    }

    /// Number of modalities (1 for single-modality experiments).
    pub fn n_modalities(&self) -> usize {
        match self {
            Modality::Single => 1,
            Modality::Multi { n_modalities } => *n_modalities,
        }
    }

    /// Whether inputs carry a modality column.
    pub fn is_multi(&self) -> bool {
        matches!(self, Modality::Multi { .. })
    }
}

/// Grid resolution for dense coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointsPerDim {
    /// Same number of points on every dimension.
    Uniform(usize),
    /// Points per dimension.
    PerDim(Vec<usize>),
}

impl From<usize> for PointsPerDim {
    fn from(value: usize) -> Self {
        PointsPerDim::Uniform(value)
    }
}

impl From<Vec<usize>> for PointsPerDim {
    fn from(value: Vec<usize>) -> Self {
        PointsPerDim::PerDim(value)
    }
}

impl PointsPerDim {
    /// Resolves the count for each of `dim` dimensions.
    pub fn resolve(&self, dim: usize) -> Result<Vec<usize>, SvaError> {
        let counts = match self {
            PointsPerDim::Uniform(k) => vec![*k; dim],
            PointsPerDim::PerDim(counts) => {
                if counts.len() != dim {
                    return Err(SvaError::Config(
                        ErrorInfo::new("ppd-length", "one grid count per dimension is required")
                            .with_context("counts", counts.len())
                            .with_context("dims", dim),
                    ));
                }
                counts.clone()
            }
        };
        if let Some(dim) = counts.iter().position(|k| *k == 0) {
            return Err(SvaError::Config(
                ErrorInfo::new("ppd-zero", "grid counts must be positive").with_context("dim", dim),
            ));
        }
        Ok(counts)
    }
}

/// Initial design protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitProtocol {
    /// Uniform random points in the experimental domain.
    Random,
}

impl FromStr for InitProtocol {
    type Err = SvaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(InitProtocol::Random),
            other => Err(SvaError::Config(
                ErrorInfo::new("unknown-init-protocol", "unsupported initialization protocol")
                    .with_context("protocol", other)
                    .with_hint("only \"random\" is available"),
            )),
        }
    }
}

/// Regular grid over `domain`; the first dimension varies slowest and
/// both bounds are included.
pub fn dense_grid(domain: &Domain, ppd: &PointsPerDim) -> Result<DMatrix<f64>, SvaError> {
    let counts = ppd.resolve(domain.dim())?;
    let axes: Vec<Vec<f64>> = counts
        .iter()
        .enumerate()
        .map(|(j, k)| linspace(domain.lower()[j], domain.upper()[j], *k))
        .collect();
    let total: usize = counts.iter().product();
    let mut grid = DMatrix::zeros(total, domain.dim());
    for row in 0..total {
        let mut rest = row;
        for j in (0..domain.dim()).rev() {
            grid[(row, j)] = axes[j][rest % counts[j]];
            rest /= counts[j];
        }
    }
    Ok(grid)
}

/// Experiment state and capability.
///
/// Owns its data and history; properties are shared read-only. Truth
/// evaluation always validates inputs first and outputs after.
#[derive(Clone)]
pub struct Experiment {
    properties: Arc<ExperimentProperties>,
    data: ExperimentData,
    history: ExperimentHistory,
    noise: NoiseModel,
    noise_seed: u64,
    truth: Arc<dyn Truth>,
    modality: Modality,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("properties", &self.properties)
            .field("truth", &self.truth.name())
            .field("modality", &self.modality)
            .field("noise", &self.noise)
            .field("n_observations", &self.data.n())
            .field("n_records", &self.history.len())
            .finish()
    }
}

impl Experiment {
    /// Noise-free single-modality experiment without data.
    pub fn new(properties: Arc<ExperimentProperties>, truth: Arc<dyn Truth>) -> Self {
        Self {
            properties,
            data: ExperimentData::new(),
            history: ExperimentHistory::new(),
            noise: NoiseModel::None,
            noise_seed: 0,
            truth,
            modality: Modality::Single,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the noise model after validating it against the output width.
    pub fn with_noise(mut self, noise: NoiseModel) -> Result<Self, SvaError> {
        noise.validate(self.properties.n_output_dim())?;
        self.noise = noise;
        Ok(self)
    }

    /// Sets the master seed of injected noise.
    pub fn with_noise_seed(mut self, seed: u64) -> Self {
        self.noise_seed = seed;
        self
    }

    /// Sets the modality flag. Fails once data has been recorded.
    pub fn with_modality(mut self, modality: Modality) -> Result<Self, SvaError> {
        if modality.n_modalities() == 0 {
            return Err(SvaError::config("zero-modalities", "at least one modality is required"));
        }
        if self.data.is_initialized() {
            return Err(SvaError::Precondition(ErrorInfo::new(
                "modality-after-data",
                "the modality flag must be set before data is recorded",
            )));
        }
        self.modality = modality;
        Ok(self)
    }

    /// Replaces the data after checking both widths.
    pub fn with_data(mut self, data: ExperimentData) -> Result<Self, SvaError> {
        if let Some(x) = data.x() {
            self.check_input_width(x)?;
        }
        if let Some(y) = data.y() {
            self.check_output_width(y)?;
            if y.nrows() > data.n() {
                return Err(SvaError::Shape(
                    ErrorInfo::new("misaligned-data", "outputs outnumber inputs")
                        .with_context("x_rows", data.n())
                        .with_context("y_rows", y.nrows()),
                ));
            }
        }
        self.data = data;
        Ok(self)
    }

    /// Replaces the history.
    pub fn with_history(mut self, history: ExperimentHistory) -> Self {
        self.history = history;
        self
    }

    /// Replaces the metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Shared properties.
    pub fn properties(&self) -> &Arc<ExperimentProperties> {
        &self.properties
    }

    /// Accumulated observations.
    pub fn data(&self) -> &ExperimentData {
        &self.data
    }

    /// Direct access to the observation store.
    pub fn data_mut(&mut self) -> &mut ExperimentData {
        &mut self.data
    }

    /// Decision history.
    pub fn history(&self) -> &ExperimentHistory {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut ExperimentHistory {
        &mut self.history
    }

    /// Noise model.
    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    /// Master seed of injected noise.
    pub fn noise_seed(&self) -> u64 {
        self.noise_seed
    }

    /// Truth function.
    pub fn truth_function(&self) -> &Arc<dyn Truth> {
        &self.truth
    }

    /// Modality flag.
    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Free-form metadata.
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Mutable free-form metadata.
    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, serde_json::Value> {
        &mut self.metadata
    }

    /// Input columns expected by validation, modality column included.
    pub fn input_width(&self) -> usize {
        self.properties.n_input_dim() + usize::from(self.modality.is_multi())
    }

    /// Checks input width and, when declared, the valid domain. The modality
    /// column is never range checked.
    pub fn validate_input(&self, x: &DMatrix<f64>) -> Result<(), SvaError> {
        self.check_input_width(x)?;
        if let Some(domain) = self.properties.valid_domain() {
            if let Some((row, col)) = domain.first_violation(x) {
                return Err(SvaError::Domain(
                    ErrorInfo::new("outside-valid-domain", "input lies outside the valid domain")
                        .with_context("row", row)
                        .with_context("column", col)
                        .with_context("value", x[(row, col)])
                        .with_context("lower", domain.lower()[col])
                        .with_context("upper", domain.upper()[col]),
                ));
            }
        }
        Ok(())
    }

    /// Checks output width and row alignment with `x`.
    pub fn validate_output(&self, x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<(), SvaError> {
        self.check_output_width(y)?;
        if y.nrows() != x.nrows() {
            return Err(SvaError::Shape(
                ErrorInfo::new("output-rows", "truth must return one row per input")
                    .with_context("inputs", x.nrows())
                    .with_context("outputs", y.nrows()),
            ));
        }
        Ok(())
    }

    /// Noise-free truth at `x`.
    pub fn truth(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        self.validate_input(x)?;
        let y = self.truth.evaluate(x)?;
        self.validate_output(x, &y)?;
        Ok(y)
    }

    /// Flattened Jacobian of the truth at `x`, width
    /// `n_output_dim * n_input_dim`.
    pub fn dtruth(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        self.validate_input(x)?;
        let jacobian = self.truth.derivative(x)?;
        let expected = self.properties.n_output_dim() * self.properties.n_input_dim();
        if jacobian.ncols() != expected || jacobian.nrows() != x.nrows() {
            return Err(SvaError::Shape(
                ErrorInfo::new("derivative-shape", "derivative has the wrong shape")
                    .with_context("rows", jacobian.nrows())
                    .with_context("columns", jacobian.ncols())
                    .with_context("expected_columns", expected),
            ));
        }
        Ok(jacobian)
    }

    /// Truth at `x` with noise drawn from `seed`.
    pub fn observe(&self, x: &DMatrix<f64>, seed: u64) -> Result<DMatrix<f64>, SvaError> {
        let y = self.truth(x)?;
        self.noise.apply(x, &y, seed)
    }

    /// Observes `x` and appends inputs and outputs together.
    ///
    /// Stored inputs still missing outputs are observed in the same batch,
    /// ahead of `x`. Noise for the batch comes from the substream of
    /// `noise_seed` keyed by the number of rows stored before the call.
    pub fn update_data(&mut self, x: &DMatrix<f64>) -> Result<(), SvaError> {
        let n_before = self.data.n();
        let seed = derive_substream_seed(self.noise_seed, n_before as u64);
        self.validate_input(x)?;
        let query = match self.data.pending_x() {
            Some(pending) => vstack(&pending, x)?,
            None => x.clone(),
        };
        let y = self.observe(&query, seed)?;
        self.data.extend(x, &y)?;
        debug!(
            rows = x.nrows(),
            filled = query.nrows() - x.nrows(),
            total = self.data.n(),
            "appended observations"
        );
        Ok(())
    }

    /// `n` uniform points in the experimental domain, modality 0.
    pub fn get_random_coordinates(&self, n: usize, seed: u64) -> Result<DMatrix<f64>, SvaError> {
        self.get_random_coordinates_at(n, seed, 0)
    }

    /// `n` uniform points in the experimental domain at `modality`.
    ///
    /// Single-modality experiments ignore `modality`.
    pub fn get_random_coordinates_at(
        &self,
        n: usize,
        seed: u64,
        modality: usize,
    ) -> Result<DMatrix<f64>, SvaError> {
        let domain = self.properties.experimental_domain();
        let mut rng = RngHandle::from_seed(seed);
        let mut points = DMatrix::zeros(n, domain.dim());
        for i in 0..n {
            for j in 0..domain.dim() {
                points[(i, j)] = domain.lower()[j] + rng.gen::<f64>() * domain.span(j);
            }
        }
        self.with_modality_column(points, modality)
    }

    /// Dense grid over the experimental domain, modality 0.
    pub fn get_dense_coordinates(&self, ppd: &PointsPerDim) -> Result<DMatrix<f64>, SvaError> {
        self.get_dense_coordinates_at(ppd, 0)
    }

    /// Dense grid over the experimental domain at `modality`.
    pub fn get_dense_coordinates_at(
        &self,
        ppd: &PointsPerDim,
        modality: usize,
    ) -> Result<DMatrix<f64>, SvaError> {
        let grid = dense_grid(self.properties.experimental_domain(), ppd)?;
        self.with_modality_column(grid, modality)
    }

    /// Observes an initial design of `n` points at modality 0.
    pub fn initialize_data(&mut self, n: usize, seed: u64, protocol: &str) -> Result<(), SvaError> {
        self.initialize_data_at(n, 0, seed, protocol)
    }

    /// Observes an initial design of `n` points at `modality`.
    pub fn initialize_data_at(
        &mut self,
        n: usize,
        modality: usize,
        seed: u64,
        protocol: &str,
    ) -> Result<(), SvaError> {
        let protocol: InitProtocol = protocol.parse()?;
        let x = match protocol {
            InitProtocol::Random => self.get_random_coordinates_at(n, seed, modality)?,
        };
        self.update_data(&x)
    }

    fn with_modality_column(
        &self,
        points: DMatrix<f64>,
        modality: usize,
    ) -> Result<DMatrix<f64>, SvaError> {
        match self.modality {
            Modality::Single => Ok(points),
            Modality::Multi { n_modalities } => {
                if modality >= n_modalities {
                    return Err(SvaError::Config(
                        ErrorInfo::new("modality-out-of-range", "modality does not exist")
                            .with_context("modality", modality)
                            .with_context("n_modalities", n_modalities),
                    ));
                }
                Ok(append_constant_column(&points, modality as f64))
            }
        }
    }

    fn check_input_width(&self, x: &DMatrix<f64>) -> Result<(), SvaError> {
        if x.ncols() != self.input_width() {
            return Err(SvaError::Shape(
                ErrorInfo::new("input-width", "inputs have the wrong number of columns")
                    .with_context("expected", self.input_width())
                    .with_context("found", x.ncols()),
            ));
        }
        Ok(())
    }

    fn check_output_width(&self, y: &DMatrix<f64>) -> Result<(), SvaError> {
        if y.ncols() != self.properties.n_output_dim() {
            return Err(SvaError::Shape(
                ErrorInfo::new("output-width", "outputs have the wrong number of columns")
                    .with_context("expected", self.properties.n_output_dim())
                    .with_context("found", y.ncols()),
            ));
        }
        Ok(())
    }
}
