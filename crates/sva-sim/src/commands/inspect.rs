use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use sva_core::ENGINE_VERSION;
use sva_exp::{load_experiment, Modality, TruthRegistry};

use super::print_json;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Directory written by `sva-sim run`.
    #[arg(long)]
    pub dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct Report {
    truth: String,
    modality: Modality,
    n_observations: usize,
    n_records: usize,
    last_iteration: Option<usize>,
    best: Option<BestObservation>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BestObservation {
    row: usize,
    x: Vec<f64>,
    y: f64,
}

pub fn run(args: &InspectArgs) -> Result<(), Box<dyn Error>> {
    let loaded = load_experiment(&args.dir, ENGINE_VERSION, &TruthRegistry::with_builtins())?;
    let experiment = &loaded.experiment;
    let data = experiment.data();
    let best = match (data.x(), data.y()) {
        (Some(x), Some(y)) if y.nrows() > 0 => {
            let mut row = 0;
            for i in 1..y.nrows() {
                if y[(i, 0)] > y[(row, 0)] {
                    row = i;
                }
            }
            Some(BestObservation {
                row,
                x: x.row(row).iter().copied().collect(),
                y: y[(row, 0)],
            })
        }
        _ => None,
    };
    let report = Report {
        truth: experiment.truth_function().name().to_string(),
        modality: experiment.modality(),
        n_observations: data.n(),
        n_records: experiment.history().len(),
        last_iteration: experiment.history().last_iteration(),
        best,
        warnings: loaded.warnings.iter().map(ToString::to_string).collect(),
    };
    print_json(&report)
}
