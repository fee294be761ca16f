use std::error::Error;

use clap::Args;
use serde::Serialize;
use sva_core::{SchemaVersion, ENGINE_VERSION};
use sva_exp::RECORD_SCHEMA;

use super::print_json;

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Emit the artifact schema alongside the engine version.
    #[arg(long)]
    pub long: bool,
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    version: &'static str,
    record_schema: SchemaVersion,
    artifacts: [&'static str; 2],
}

pub fn run(args: &VersionArgs) -> Result<(), Box<dyn Error>> {
    if !args.long {
        println!("{ENGINE_VERSION}");
        return Ok(());
    }
    print_json(&VersionInfo {
        version: ENGINE_VERSION,
        record_schema: RECORD_SCHEMA,
        artifacts: [sva_exp::STRUCTURED_ARTIFACT, sva_exp::HISTORY_ARTIFACT],
    })
}
