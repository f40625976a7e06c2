use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gudang_cli::{run, Cli};
use gudang_config::GudangConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = GudangConfig::load(cli.config.as_deref())?;
    let filter = EnvFilter::try_new(&config.logging.filter)
        .with_context(|| format!("invalid log filter {}", config.logging.filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    run(cli, config)
}
