use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use cctp_relayer::{app, Config};

#[derive(Parser)]
#[command(name = "cctp-relayer", about = "Relays CCTP messages between chains", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start relaying CCTP transactions
    Start,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %cli.config.display(), error = %err, "unable to load config");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Start => match app::run(config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %err, "relayer exited with error");
                ExitCode::FAILURE
            }
        },
    }
}
