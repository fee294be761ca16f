//! Experiment state, the model-guided experiment loop and its persistence.

mod campaign;
mod data;
pub mod dream;
mod experiment;
mod history;
mod noise;
mod persist;
mod properties;
mod truth;

pub use campaign::{select_target, LoopConfig, LoopHooks, LoopSummary, Scalarizer, DEFAULT_LOOP_SEED};
pub use data::ExperimentData;
pub use dream::{dreamed_experiment, DreamedTruth};
pub use experiment::{dense_grid, Experiment, InitProtocol, Modality, PointsPerDim};
pub use history::{ExperimentHistory, HistoryRecord};
pub use noise::{NoiseFn, NoiseModel};
pub use persist::{
    load_experiment, CompatibilityWarning, ExperimentRecord, LoadedExperiment, EXPERIMENT_CLASS,
    HISTORY_ARTIFACT, RECORD_SCHEMA, STRUCTURED_ARTIFACT,
};
pub use properties::ExperimentProperties;
pub use truth::{
    derivative_unsupported, LinearTruth, MultiFidelitySinusoid, NegatedSphereTruth,
    SinusoidTruth, Truth, TruthConstructor, TruthDescriptor, TruthRegistry,
};
