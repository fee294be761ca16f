use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use sva_core::ENGINE_VERSION;
use sva_exp::{load_experiment, TruthRegistry};
use tracing::info;

use super::{print_json, write_json};
use crate::campaign::{Campaign, CAMPAIGN_FILE};

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Directory written by `sva-sim run`.
    #[arg(long)]
    pub dir: PathBuf,
    /// Points to acquire; defaults to the campaign budget.
    #[arg(long)]
    pub budget: Option<usize>,
}

pub fn run(args: &ResumeArgs) -> Result<(), Box<dyn Error>> {
    let campaign: Campaign =
        serde_yaml::from_str(&fs::read_to_string(args.dir.join(CAMPAIGN_FILE))?)?;
    let loaded = load_experiment(&args.dir, ENGINE_VERSION, &TruthRegistry::with_builtins())?;
    let mut experiment = loaded.experiment;
    let mut config = campaign.loop_config.clone();
    if let Some(budget) = args.budget {
        config.budget = budget;
    }
    info!(
        from_iteration = experiment.history().last_iteration().map_or(0, |ii| ii + 1),
        budget = config.budget,
        "resuming campaign"
    );
    let summary = experiment.run_gp_experiment_default(&config, &campaign.hooks()?)?;
    experiment.save(&args.dir)?;
    write_json(args.dir.join("summary.json"), &summary)?;
    print_json(&summary)
}
