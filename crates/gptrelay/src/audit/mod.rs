//! Completed-turn audit log
//!
//! Every successfully completed turn is handed to a [`TurnLog`] without the
//! turn waiting on it. Sinks are best-effort: the relay only warns when an
//! append fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::LogConfig;
use crate::error::{RelayError, Result};
use crate::turn::TurnResult;

/// One persisted turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(flatten)]
    pub turn: TurnResult,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(turn: TurnResult) -> Self {
        Self {
            turn,
            timestamp: Utc::now(),
        }
    }
}

/// Sink for completed turns
#[async_trait]
pub trait TurnLog: Send + Sync {
    async fn append(&self, turn: &TurnResult) -> Result<()>;

    /// All entries, oldest first
    async fn list(&self) -> Result<Vec<LogEntry>>;
}

/// Build the sink selected by `config`
pub fn from_config(config: &LogConfig) -> Arc<dyn TurnLog> {
    if config.enabled {
        Arc::new(JsonlTurnLog::new(&config.path))
    } else {
        Arc::new(NullTurnLog)
    }
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonlTurnLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlTurnLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TurnLog for JsonlTurnLog {
    async fn append(&self, turn: &TurnResult) -> Result<()> {
        let mut line = serde_json::to_string(&LogEntry::new(turn.clone()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RelayError::Audit(format!(
                    "Failed to create log directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                RelayError::Audit(format!("Failed to open {}: {e}", self.path.display()))
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(message_id = %turn.message_id, "Turn appended to audit log");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RelayError::Audit(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed audit line {}: {e}", index + 1),
            }
        }
        Ok(entries)
    }
}

/// In-memory sink, mostly for tests
#[derive(Debug, Default)]
pub struct MemoryTurnLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryTurnLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TurnLog for MemoryTurnLog {
    async fn append(&self, turn: &TurnResult) -> Result<()> {
        self.entries.lock().await.push(LogEntry::new(turn.clone()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries.lock().await.clone())
    }
}

/// Discards everything; used when the audit log is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTurnLog;

#[async_trait]
impl TurnLog for NullTurnLog {
    async fn append(&self, _turn: &TurnResult) -> Result<()> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LogEntry>> {
        Ok(Vec::new())
    }
}
