pub mod client;
pub mod commands;
pub mod error;
pub mod output;

pub use client::DaemonClient;
pub use commands::{ChatCommand, HealthCommand, LogsCommand, ModeCommand};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_timestamp, truncate_string};
