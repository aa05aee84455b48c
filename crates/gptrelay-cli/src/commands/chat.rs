use clap::Parser;
use std::io::Write;

use crate::client::{ChatReply, ChatRequest, DaemonClient};
use crate::error::{CliError, CliResult};
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct ChatCommand {
    #[clap(help = "Message to send")]
    pub message: String,

    #[clap(long, help = "Continue an existing conversation")]
    pub conversation_id: Option<String>,

    #[clap(long, help = "Message this turn replies to")]
    pub parent_message_id: Option<String>,

    #[clap(long, help = "Model to request")]
    pub model: Option<String>,

    #[clap(long, help = "API key for the keyed backend")]
    pub api_key: Option<String>,

    #[clap(long, help = "Wait for the full reply instead of streaming it")]
    pub no_stream: bool,
}

impl ChatCommand {
    pub async fn execute(&self, client: &DaemonClient, format: OutputFormat) -> CliResult<()> {
        let request = ChatRequest {
            message: self.message.clone(),
            conversation_id: self.conversation_id.clone(),
            parent_message_id: self.parent_message_id.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            no_streaming: None,
        };

        if self.no_stream || matches!(format, OutputFormat::Json) {
            return self.execute_once(client, &request, format).await;
        }

        let mut printer = IncrementalPrinter::default();
        let mut stdout = std::io::stdout();
        client
            .chat_stream(&request, |record| {
                let delta = printer.delta(&record.text);
                let _ = stdout.write_all(delta.as_bytes());
                let _ = stdout.flush();
                printer.conversation_id = record.conversation_id.or(printer.conversation_id.take());
                printer.message_id = record.id.or(printer.message_id.take());
            })
            .await?;
        println!();

        if let Some(ref id) = printer.conversation_id {
            eprintln!("conversation: {id}");
        }
        if let Some(ref id) = printer.message_id {
            eprintln!("message: {id}");
        }
        Ok(())
    }

    async fn execute_once(
        &self,
        client: &DaemonClient,
        request: &ChatRequest,
        format: OutputFormat,
    ) -> CliResult<()> {
        match client.chat_once(request).await? {
            ChatReply::Completed(result) => match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Table => {
                    println!("{}", result.response_text);
                    if let Some(ref id) = result.conversation_id {
                        eprintln!("conversation: {id}");
                    }
                    eprintln!("message: {}", result.message_id);
                }
            },
            ChatReply::Failed(record) => return Err(CliError(record.text)),
        }
        Ok(())
    }
}

/// Turns accumulated partial texts into printable deltas
#[derive(Debug, Default)]
struct IncrementalPrinter {
    printed: String,
    conversation_id: Option<String>,
    message_id: Option<String>,
}

impl IncrementalPrinter {
    fn delta(&mut self, text: &str) -> String {
        let delta = match text.strip_prefix(self.printed.as_str()) {
            Some(rest) => rest.to_string(),
            // Not an extension of what was printed (e.g. an error record)
            None => format!("\n{text}"),
        };
        self.printed = text.to_string();
        delta
    }
}
