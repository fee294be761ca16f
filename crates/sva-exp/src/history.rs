//! Append-only log of loop decisions.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sva_models::{AcquisitionState, ModelSnapshot};

/// One loop iteration's decision trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Iteration index, continuing across loop invocations.
    pub iteration: usize,
    /// Points applied to the truth function, task column included for
    /// multi-modal experiments.
    pub next_points: DMatrix<f64>,
    /// Acquisition value of the proposal.
    pub value: f64,
    /// Modality the acquisition targeted.
    pub modality: usize,
    /// Observation rows available when the surrogate was fit.
    pub n_observations: usize,
    /// Acquisition function used for the proposal.
    pub acquisition_function: AcquisitionState,
    /// Surrogate as fitted for this iteration.
    pub surrogate: ModelSnapshot,
}

/// Ordered records, one per loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentHistory {
    records: Vec<HistoryRecord>,
}

impl ExperimentHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn append(&mut self, record: HistoryRecord) {
        self.records.push(record);
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iteration index of the most recent record.
    pub fn last_iteration(&self) -> Option<usize> {
        self.records.last().map(|record| record.iteration)
    }

    pub(crate) fn from_records(records: Vec<HistoryRecord>) -> Self {
        Self { records }
    }
}
