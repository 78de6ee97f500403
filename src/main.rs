use clap::Parser;
use tracing::info;

use rollshot::cli::{self, Cli, Commands};
use rollshot::config::SystemConfig;
use rollshot::types::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // config errors surface after logging is up
    let system_config = match &cli.command {
        Commands::Version => Ok(SystemConfig::default()),
        _ => cli::load_system_config(&cli),
    };

    rollshot::logging::init(
        cli.log_level_override(),
        cli.log_format_override(),
        system_config.as_ref().ok(),
    )?;

    let system_config = system_config?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rollshot");

    match cli.command.clone() {
        Commands::Run(args) => {
            if !cli::run_batch_file(&cli, args, system_config).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Validate(args) => cli::validate_batch_file(&cli, args, system_config).await,
        Commands::Version => cli::show_version().await,
    }
}
