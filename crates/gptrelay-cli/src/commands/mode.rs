use clap::Parser;

use crate::client::DaemonClient;
use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct ModeCommand {}

impl ModeCommand {
    pub async fn execute(&self, client: &DaemonClient, format: OutputFormat) -> CliResult<()> {
        let mode = client.toggle_mode().await?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&mode)?),
            OutputFormat::Table => {
                if mode.use_crawler_default {
                    println!("Requests without an apiKey now use the shared session backend");
                } else {
                    println!("Requests without an apiKey now use the default API key");
                }
            }
        }
        Ok(())
    }
}
