#![deny(missing_docs)]
#![doc = "Surrogate modeling and acquisition services used by SVA experiment loops."]

pub mod acquisition;
pub mod gp;
pub mod optimize;
pub mod surrogate;

pub use acquisition::{
    AcquisitionConfig, AcquisitionFamily, AcquisitionService, AcquisitionState, AskOutcome,
    AskRequest, Criterion, OptimizeAcqf, OptimizerSettings, BEST_F, BETA,
};
pub use gp::{GaussianProcess, GpFitter, GpHyperparameters, TrainProtocol, GP_KIND};
pub use optimize::maximize;
pub use surrogate::{
    ModelSnapshot, PosteriorTransform, Prediction, Surrogate, SurrogateFitter, TaskSpec,
};
