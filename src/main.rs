use anyhow::Result;
use clap::Parser;

use securerails::cli::commands::{
    init::InitCommand, locate::LocateCommand, seed::SeedCommand, serve::ServeCommand,
    show_how_to_get_started, status::StatusCommand,
};
use securerails::cli::{Cli, Commands};
use securerails::{config, init_telemetry, SecureRailsConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        show_how_to_get_started();
        return Ok(());
    };

    // init must work even when the existing config is broken
    if let Commands::Init { force } = command {
        return InitCommand::new(force).execute();
    }

    SecureRailsConfig::load_env_file()?;
    let config = config()?;
    init_telemetry(&config.observability)?;

    match command {
        Commands::Serve { port } => ServeCommand { port }.execute(config).await,
        Commands::Seed { file } => SeedCommand { file }.execute(config).await,
        Commands::Status { batch } => StatusCommand { batch }.execute(config).await,
        Commands::Locate { lat, lon } => {
            LocateCommand {
                latitude: lat,
                longitude: lon,
            }
            .execute(config)
            .await
        }
        Commands::Init { .. } => Ok(()),
    }
}
