mod cli;
mod config;
mod helper;

use crate::cli::Cli;
use crate::config::{Config, DEFAULT_LOG_LEVEL};
use crate::helper::get_snapshotter_instance;
use clap::Parser;
use snapshot::Snapshotter;

pub use cli::{Handler, Result};

async fn run(cli: Cli, config: Config) -> Result<()> {
    log::debug!("using snapshotter root {}", config.root_dir.display());

    let snapshotter = get_snapshotter_instance(&config)?;
    let result = cli.command().handler(&snapshotter).await;

    snapshotter.close().await?;
    result
}

#[tokio::main]
async fn main() {
    let cli: Cli = Cli::parse();

    let config = Config::resolve(
        cli.options.root.as_deref(),
        cli.options.log_level,
        &cli.options.config,
    );

    let level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |config| config.log_level);
    env_logger::Builder::new().filter_level(level).init();

    if let Err(e) = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    } {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
