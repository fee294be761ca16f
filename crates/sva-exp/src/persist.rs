//! Saving and loading experiments.
//!
//! An experiment directory holds two artifacts: `experiment.json`, a
//! structured record of everything except the history, and
//! `experiment_history.bin`, the history records encoded with bincode.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sva_core::{ErrorInfo, SchemaVersion, SvaError, ENGINE_VERSION};
use tracing::{info, warn};

use crate::data::ExperimentData;
use crate::experiment::{Experiment, Modality};
use crate::history::{ExperimentHistory, HistoryRecord};
use crate::noise::NoiseModel;
use crate::properties::ExperimentProperties;
use crate::truth::{TruthDescriptor, TruthRegistry};

/// Class label stored in the structured artifact.
pub const EXPERIMENT_CLASS: &str = "sva_exp::Experiment";
/// File name of the structured artifact.
pub const STRUCTURED_ARTIFACT: &str = "experiment.json";
/// File name of the history artifact.
pub const HISTORY_ARTIFACT: &str = "experiment_history.bin";
/// Schema of the structured artifact written by this version.
pub const RECORD_SCHEMA: SchemaVersion = SchemaVersion::new(1, 0, 0);

/// Structured artifact contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Always [`EXPERIMENT_CLASS`].
    pub class: String,
    /// Engine version that wrote the record.
    pub version: String,
    /// Record schema.
    pub schema_version: SchemaVersion,
    /// Truth identity.
    pub truth: TruthDescriptor,
    /// Experiment properties.
    pub properties: ExperimentProperties,
    /// Noise model.
    pub noise: NoiseModel,
    /// Master noise seed.
    pub noise_seed: u64,
    /// Modality flag.
    pub modality: Modality,
    /// Observations.
    pub data: ExperimentData,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// File name of the history artifact, relative to the record.
    pub history_artifact: String,
}

/// Saved state written by a different engine version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityWarning {
    /// Version recorded in the artifact.
    pub saved_version: String,
    /// Version of the loading engine.
    pub running_version: String,
}

impl fmt::Display for CompatibilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "experiment saved with version {} is loaded by version {}; behavior may differ",
            self.saved_version, self.running_version
        )
    }
}

/// Result of [`load_experiment`].
#[derive(Debug)]
pub struct LoadedExperiment {
    /// Rebuilt experiment.
    pub experiment: Experiment,
    /// Compatibility warnings raised while loading.
    pub warnings: Vec<CompatibilityWarning>,
}

impl Experiment {
    /// Structured record of everything except the history.
    pub fn to_record(&self) -> Result<ExperimentRecord, SvaError> {
        if !self.noise().is_persistable() {
            return Err(SvaError::Config(
                ErrorInfo::new("callable-noise", "callable noise cannot be saved")
                    .with_hint("use scalar or per-output noise for persisted experiments"),
            ));
        }
        check_finite("x", self.data().x())?;
        check_finite("y", self.data().y())?;
        Ok(ExperimentRecord {
            class: EXPERIMENT_CLASS.to_string(),
            version: ENGINE_VERSION.to_string(),
            schema_version: RECORD_SCHEMA,
            truth: TruthDescriptor::of(self.truth_function().as_ref())?,
            properties: self.properties().as_ref().clone(),
            noise: self.noise().clone(),
            noise_seed: self.noise_seed(),
            modality: self.modality(),
            data: self.data().clone(),
            metadata: self.metadata().clone(),
            history_artifact: HISTORY_ARTIFACT.to_string(),
        })
    }

    /// Writes both artifacts into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<(), SvaError> {
        let record = self.to_record()?;
        fs::create_dir_all(dir).map_err(|err| io_error("create-dir", dir, err))?;
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|err| SvaError::serde("record-encode", err))?;
        let record_path = dir.join(STRUCTURED_ARTIFACT);
        fs::write(&record_path, json).map_err(|err| io_error("write-record", &record_path, err))?;

        let history = bincode::serialize(self.history().records())
            .map_err(|err| SvaError::serde("history-encode", err))?;
        let history_path = dir.join(HISTORY_ARTIFACT);
        fs::write(&history_path, history)
            .map_err(|err| io_error("write-history", &history_path, err))?;
        info!(
            dir = %dir.display(),
            observations = self.data().n(),
            records = self.history().len(),
            "saved experiment"
        );
        Ok(())
    }
}

/// Loads the experiment saved in `dir`.
///
/// The truth is rebuilt through `registry`. A record written by a version
/// other than `running_version` still loads; the mismatch is returned as a
/// warning.
pub fn load_experiment(
    dir: &Path,
    running_version: &str,
    registry: &TruthRegistry,
) -> Result<LoadedExperiment, SvaError> {
    let record_path = dir.join(STRUCTURED_ARTIFACT);
    let bytes = fs::read(&record_path).map_err(|err| io_error("read-record", &record_path, err))?;
    let record: ExperimentRecord =
        serde_json::from_slice(&bytes).map_err(|err| SvaError::serde("record-decode", err))?;
    if record.class != EXPERIMENT_CLASS {
        return Err(SvaError::Serde(
            ErrorInfo::new("record-class", "artifact does not describe an experiment")
                .with_context("class", &record.class),
        ));
    }
    if !RECORD_SCHEMA.reads(&record.schema_version) {
        return Err(SvaError::Serde(
            ErrorInfo::new("record-schema", "unsupported record schema")
                .with_context("found", record.schema_version)
                .with_context("supported", RECORD_SCHEMA),
        ));
    }

    let mut warnings = Vec::new();
    if record.version != running_version {
        let warning = CompatibilityWarning {
            saved_version: record.version.clone(),
            running_version: running_version.to_string(),
        };
        warn!(
            saved = %warning.saved_version,
            running = %warning.running_version,
            "{warning}"
        );
        warnings.push(warning);
    }

    let history_path = dir.join(&record.history_artifact);
    let bytes =
        fs::read(&history_path).map_err(|err| io_error("read-history", &history_path, err))?;
    let records: Vec<HistoryRecord> =
        bincode::deserialize(&bytes).map_err(|err| SvaError::serde("history-decode", err))?;

    let truth = registry.build(&record.truth)?;
    let experiment = Experiment::new(Arc::new(record.properties), truth)
        .with_modality(record.modality)?
        .with_noise(record.noise)?
        .with_noise_seed(record.noise_seed)
        .with_data(record.data)?
        .with_metadata(record.metadata)
        .with_history(ExperimentHistory::from_records(records));
    Ok(LoadedExperiment {
        experiment,
        warnings,
    })
}

/// JSON has no encoding for NaN or infinities.
fn check_finite(name: &str, values: Option<&DMatrix<f64>>) -> Result<(), SvaError> {
    let Some(values) = values else {
        return Ok(());
    };
    for i in 0..values.nrows() {
        for j in 0..values.ncols() {
            if !values[(i, j)].is_finite() {
                return Err(SvaError::Serde(
                    ErrorInfo::new("non-finite-data", "observations must be finite to be saved")
                        .with_context("array", name)
                        .with_context("row", i)
                        .with_context("column", j)
                        .with_hint("declare a valid_domain to reject such inputs on entry"),
                ));
            }
        }
    }
    Ok(())
}

fn io_error(code: &str, path: &Path, err: std::io::Error) -> SvaError {
    SvaError::Serde(
        ErrorInfo::new(code, "filesystem operation failed")
            .with_context("path", path.display())
            .with_hint(err.to_string()),
    )
}
