//! YAML campaign files.

use std::sync::Arc;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sva_core::{derive_substream_seed, Domain, ErrorInfo, SvaError};
use sva_exp::{
    Experiment, ExperimentProperties, LoopConfig, LoopHooks, Modality, NoiseModel,
    TruthDescriptor, TruthRegistry,
};

/// File name of the campaign copy stored next to the experiment artifacts.
pub const CAMPAIGN_FILE: &str = "campaign.yaml";

/// Everything needed to start a campaign from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub truth: TruthDescriptor,
    pub n_input_dim: usize,
    #[serde(default = "default_output_dim")]
    pub n_output_dim: usize,
    pub experimental_domain: Domain,
    #[serde(default)]
    pub valid_domain: Option<Domain>,
    #[serde(default)]
    pub noise: NoiseModel,
    #[serde(default)]
    pub noise_seed: u64,
    /// Number of modalities; unset for single-modality campaigns.
    #[serde(default)]
    pub n_modalities: Option<usize>,
    #[serde(default)]
    pub initial: InitialDesign,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    #[serde(default)]
    pub schedule: ModalitySchedule,
    /// Output column used as the target of multi-output campaigns.
    #[serde(default)]
    pub target_column: Option<usize>,
}

fn default_output_dim() -> usize {
    1
}

/// Initial design, applied to every modality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialDesign {
    #[serde(default = "default_initial_points")]
    pub n: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_initial_points() -> usize {
    5
}

fn default_protocol() -> String {
    "random".to_string()
}

impl Default for InitialDesign {
    fn default() -> Self {
        Self {
            n: default_initial_points(),
            seed: 0,
            protocol: default_protocol(),
        }
    }
}

/// Which modality each loop iteration acquires for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModalitySchedule {
    Fixed { modality: usize },
    RoundRobin,
}

impl Default for ModalitySchedule {
    fn default() -> Self {
        ModalitySchedule::Fixed { modality: 0 }
    }
}

impl Campaign {
    /// Builds the experiment and observes its initial design.
    pub fn build_experiment(&self, registry: &TruthRegistry) -> Result<Experiment, SvaError> {
        let properties = ExperimentProperties::new(
            self.n_input_dim,
            self.n_output_dim,
            self.valid_domain.clone(),
            self.experimental_domain.clone(),
        )?;
        let modality = match self.n_modalities {
            Some(n) => Modality::multi(n)?,
            None => Modality::Single,
        };
        let mut experiment = Experiment::new(Arc::new(properties), registry.build(&self.truth)?)
            .with_modality(modality)?
            .with_noise(self.noise.clone())?
            .with_noise_seed(self.noise_seed);
        for m in 0..modality.n_modalities() {
            experiment.initialize_data_at(
                self.initial.n,
                m,
                derive_substream_seed(self.initial.seed, m as u64),
                &self.initial.protocol,
            )?;
        }
        Ok(experiment)
    }

    /// Loop callbacks for this campaign.
    pub fn hooks(&self) -> Result<LoopHooks, SvaError> {
        let mut hooks = LoopHooks::default();
        match &self.schedule {
            ModalitySchedule::Fixed { modality } => {
                let modality = *modality;
                hooks = hooks.with_modality(move |_| modality);
            }
            ModalitySchedule::RoundRobin => {
                let n = self.n_modalities.unwrap_or(1);
                hooks = hooks.with_modality(move |ii| ii % n);
            }
        }
        if let Some(column) = self.target_column {
            if column >= self.n_output_dim {
                return Err(SvaError::Config(
                    ErrorInfo::new("target-column", "target column does not exist")
                        .with_context("target_column", column)
                        .with_context("n_output_dim", self.n_output_dim),
                ));
            }
            hooks = hooks.with_scalarizer(move |_x: &DMatrix<f64>, y: &DMatrix<f64>| {
                Ok(y.column(column).iter().copied().collect())
            });
        }
        Ok(hooks)
    }
}
