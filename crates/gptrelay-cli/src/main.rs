use clap::{Parser, Subcommand};
use gptrelay_cli::commands::{ChatCommand, HealthCommand, LogsCommand, ModeCommand};
use gptrelay_cli::error::CliResult;
use gptrelay_cli::output::OutputFormat;
use gptrelay_cli::DaemonClient;

#[derive(Parser)]
#[command(name = "gptrelay-cli")]
#[command(about = "gptrelay CLI - Operator tool for a running gptrelay daemon")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(
        long,
        short = 'u',
        global = true,
        default_value = "http://127.0.0.1:8000",
        help = "Base URL of the gptrelay daemon"
    )]
    pub url: String,

    #[clap(long, global = true, help = "Admin key for /sys routes")]
    pub admin_key: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Check that the daemon is up")]
    Health(HealthCommand),

    #[clap(name = "toggle-mode", about = "Flip the backend used for requests without an apiKey")]
    ToggleMode(ModeCommand),

    #[clap(about = "List recorded turns")]
    Logs(LogsCommand),

    #[clap(about = "Send a message through the relay")]
    Chat(ChatCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let client = DaemonClient::new(&cli.url, cli.admin_key.clone())?;

    match &cli.command {
        Command::Health(cmd) => cmd.execute(&client, format).await,
        Command::ToggleMode(cmd) => cmd.execute(&client, format).await,
        Command::Logs(cmd) => cmd.execute(&client, format).await,
        Command::Chat(cmd) => cmd.execute(&client, format).await,
    }
}
