//! iothub-sas - generate, inspect and renew IoT Hub SAS tokens.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod logger;

#[derive(Parser)]
#[command(name = "iothub-sas")]
#[command(version)]
#[command(about = "Generate, inspect and renew IoT Hub SAS tokens", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file (defaults to ./iothub-sas.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a new token for the configured device or module
    Generate {
        /// Requested token lifetime, overriding [token] in the config
        #[arg(long)]
        ttl_secs: Option<i64>,
    },

    /// Decode a token and show its audience and expiry
    Inspect {
        /// The SharedAccessSignature string
        token: String,

        /// Base64 key to verify the signature with
        #[arg(long)]
        key: Option<String>,
    },

    /// Keep the configured credentials renewed until Ctrl-C
    Watch {
        /// Seconds between expiry checks
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    logger::setup_logger(config.logging(), cli.verbose).context("Failed to set up logging")?;

    match cli.command {
        Commands::Generate { ttl_secs } => commands::generate(&config, ttl_secs).await,
        Commands::Inspect { token, key } => commands::inspect(&token, key.as_deref()),
        Commands::Watch { interval_secs } => commands::watch(&config, interval_secs).await,
    }
}
