mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cli::Cli;
use commands::App;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    cli::init_logging(&cli).context("Failed to initialize logging")?;

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path).context("Failed to load configuration")?;
    if let Some(data_file) = &cli.data_file {
        config.paths.data_file = data_file.clone();
    }

    config
        .ensure_directories()
        .context("Failed to create directories")?;

    info!("Configuration loaded from {:?}", config_path);
    info!("Data file: {:?}", config.paths.data_file);

    let app = App::open(config).context("Failed to open chat data")?;

    let mut stdout = std::io::stdout();
    app.run(cli.command, &mut stdout).await
}
