pub mod reap;
pub mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{InstanceOptions, load_from_env, load_from_file, merge_sources};
use std::path::Path;

#[derive(Parser)]
#[command(
    name = "scratchdb",
    author,
    version,
    about = "scratchdb - disposable MongoDB instances for test suites",
    long_about = "Starts an isolated MongoDB instance per test context, with stale process \
                  reaping and free port negotiation.\n\nOptions come from flags, SCRATCHDB_* \
                  environment variables and an optional TOML/YAML file, in that order."
)]
pub struct Cli {
    #[arg(long, global = true, help = "Log every lifecycle step and keep engine output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Start an instance, print its URL and stop it on Ctrl-C")]
    Run(run::RunArgs),

    #[command(about = "Terminate stale engine processes of a context")]
    Reap(reap::ReapArgs)
}

/// Merges file, environment and flag options, flags winning.
pub fn load_options(config_file: Option<&Path>, explicit: InstanceOptions) -> Result<InstanceOptions> {
    let from_file = match config_file {
        Some(path) => load_from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => InstanceOptions::default()
    };
    let from_env = load_from_env()?;
    Ok(merge_sources(from_file, from_env, explicit))
}
