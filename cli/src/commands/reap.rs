use anyhow::Result;
use clap::Args;
use config::{InstanceOptions, resolve};
use lifecycle::ProcessReaper;
use std::path::PathBuf;

#[derive(Args)]
pub struct ReapArgs {
    #[arg(help = "Test context whose stale processes are terminated")]
    pub context: String,

    #[arg(long, help = "TOML or YAML options file")]
    pub config: Option<PathBuf>
}

pub async fn run(args: ReapArgs) -> Result<()> {
    let options = super::load_options(args.config.as_deref(), InstanceOptions::default())?;
    let config = resolve(&args.context, options);

    let reaper = ProcessReaper::new(config.executable_name());
    let reaped = reaper.cleanup(&config.working_directory).await?;

    println!(
        "Reaped {} stale engine process(es) for {}",
        reaped,
        config.working_directory.display()
    );
    Ok(())
}
