//! gptrelay daemon - streaming chat proxy

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gptrelay::RelayError;
use gptrelay::config::Config;
use gptrelay::error::Result;
use gptrelay::proxy::ProxyServer;

/// gptrelay - Relay chat turns to keyed API or shared session backends
#[derive(Parser)]
#[command(name = "gptrelay")]
#[command(about = "A streaming chat proxy for keyed API and shared session backends")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the relay server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gptrelay=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn read_config(path: &Path) -> Result<Config> {
    tracing::info!("Loading config from: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| {
        RelayError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    toml::from_str(&content)
        .map_err(|e| RelayError::Config(format!("Failed to parse config: {e}")))
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        return read_config(&path);
    }

    let default_paths = [
        dirs::home_dir().map(|h| h.join(".gptrelay").join("config.toml")),
        dirs::config_dir().map(|c| c.join("gptrelay").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            return read_config(path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting gptrelay daemon");

    let config = load_config(config_path)?;
    tracing::debug!("Config loaded: {:?}", config);

    let server = ProxyServer::new(config);
    server.serve().await?;

    tracing::info!("gptrelay daemon stopped");
    Ok(())
}
