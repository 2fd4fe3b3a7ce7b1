use anyhow::{Context, Result};
use clap::Args;
use config::InstanceOptions;
use fixtures::FixtureSet;
use std::path::{Path, PathBuf};
use testing::TestDatabase;

#[derive(Args)]
pub struct RunArgs {
    #[arg(help = "Test context the instance belongs to")]
    pub context: String,

    #[arg(long, help = "Port the free-port scan starts from")]
    pub port: Option<u16>,

    #[arg(long, help = "Launch a replica set instead of a single process")]
    pub replica_set: bool,

    #[arg(long, help = "Required engine version, e.g. 7.0")]
    pub engine_version: Option<String>,

    #[arg(long, help = "TOML or YAML options file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "JSON fixture file to load after start")]
    pub fixtures: Option<PathBuf>
}

pub async fn run(args: RunArgs, verbose: bool) -> Result<()> {
    let explicit = InstanceOptions {
        db_port: args.port,
        use_replica_set: args.replica_set.then_some(true),
        version: args.engine_version,
        ..InstanceOptions::default()
    };
    let options = super::load_options(args.config.as_deref(), explicit)?;
    let fixture_set = args.fixtures.as_deref().map(read_fixtures).transpose()?;

    let mut db = TestDatabase::new(&args.context, options);
    let url = db.start(verbose).await?;

    if let Some(data) = fixture_set {
        match db.load(data, false).await {
            Ok(counts) => {
                for (collection, inserted) in &counts {
                    tracing::info!(collection = %collection, inserted, "fixtures loaded");
                }
            }
            Err(e) => {
                db.stop().await?;
                return Err(e.into());
            }
        }
    }

    println!("{url}");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!(context = %args.context, "shutting down");
    db.stop().await?;
    Ok(())
}

fn read_fixtures(path: &Path) -> Result<FixtureSet> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture file {}", path.display()))?;
    FixtureSet::from_json_str(&json)
        .with_context(|| format!("Invalid fixture file {}", path.display()))
}
