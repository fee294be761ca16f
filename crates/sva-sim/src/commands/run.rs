use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use sva_exp::TruthRegistry;
use tracing::info;

use super::{print_json, write_json};
use crate::campaign::{Campaign, CAMPAIGN_FILE};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML campaign describing the experiment and loop.
    #[arg(long)]
    pub config: PathBuf,
    /// Output directory for experiment artifacts.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let campaign: Campaign = serde_yaml::from_str(&fs::read_to_string(&args.config)?)?;
    fs::create_dir_all(&args.out)?;
    let registry = TruthRegistry::with_builtins();
    let mut experiment = campaign.build_experiment(&registry)?;
    info!(
        truth = %campaign.truth.name,
        observations = experiment.data().n(),
        budget = campaign.loop_config.budget,
        "starting campaign"
    );
    let summary = experiment.run_gp_experiment_default(&campaign.loop_config, &campaign.hooks()?)?;

    experiment.save(&args.out)?;
    fs::write(args.out.join(CAMPAIGN_FILE), serde_yaml::to_string(&campaign)?)?;
    write_json(args.out.join("summary.json"), &summary)?;
    print_json(&summary)
}
