#![deny(missing_docs)]
#![doc = "Core error, randomness, domain and array types for the SVA experiment engine."]

pub mod array;
pub mod domain;
pub mod errors;
pub mod provenance;
pub mod rng;

pub use domain::Domain;
pub use errors::{ErrorInfo, SvaError};
pub use provenance::{SchemaVersion, ENGINE_VERSION};
pub use rng::{derive_substream_seed, RngHandle};
