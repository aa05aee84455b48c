use clap::Parser;

use crate::client::DaemonClient;
use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct HealthCommand {}

impl HealthCommand {
    pub async fn execute(&self, client: &DaemonClient, format: OutputFormat) -> CliResult<()> {
        let status = client.health().await?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Table => {
                let state = status["status"].as_str().unwrap_or("unknown");
                println!("Daemon status: {state}");
            }
        }
        Ok(())
    }
}
