//! Operator routes under `/sys`
//!
//! Shared request/response types for the daemon's admin surface, also used
//! by `gptrelay-cli`.

pub mod handlers;

use serde::{Deserialize, Serialize};

/// Credential presented to admin routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminQuery {
    pub api_key: Option<String>,
}

/// Result of flipping the default mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeResponse {
    /// True when an absent credential resolves to the session backend
    pub use_crawler_default: bool,
}
