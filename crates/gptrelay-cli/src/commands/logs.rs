use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use gptrelay::audit::LogEntry;

use crate::client::DaemonClient;
use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct LogsCommand {
    #[clap(long, short, default_value = "20", help = "Show only the most recent N turns")]
    pub limit: usize,

    #[clap(long, help = "Only show turns from this conversation")]
    pub conversation: Option<String>,
}

impl LogsCommand {
    pub async fn execute(&self, client: &DaemonClient, format: OutputFormat) -> CliResult<()> {
        let entries = self.select(client.logs().await?);

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            OutputFormat::Table => {
                if entries.is_empty() {
                    println!("No turns recorded.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Time", "Model", "Conversation", "Message", "Response"]);

                for entry in &entries {
                    table.add_row([
                        format_timestamp(&entry.timestamp),
                        entry.turn.effective_model.clone(),
                        truncate_string(entry.turn.conversation_id.as_deref().unwrap_or("-"), 12),
                        truncate_string(&entry.turn.input_message, 40),
                        truncate_string(&entry.turn.response_text, 60),
                    ]);
                }

                println!("{table}");
                println!("Showing {} turn(s)", entries.len());
            }
        }

        Ok(())
    }

    /// Keep the newest `limit` entries matching the conversation filter, oldest first
    fn select(&self, entries: Vec<LogEntry>) -> Vec<LogEntry> {
        let mut matching: Vec<LogEntry> = entries
            .into_iter()
            .filter(|e| match self.conversation {
                Some(ref id) => e.turn.conversation_id.as_deref() == Some(id.as_str()),
                None => true,
            })
            .collect();
        let skip = matching.len().saturating_sub(self.limit);
        matching.drain(..skip);
        matching
    }
}
