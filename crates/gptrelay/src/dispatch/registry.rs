//! Per-credential keyed client cache
//!
//! Clients are created on first use and kept for the life of the process.
//! The map is unbounded; credentials are operator-issued.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::backend::ChatBackend;

/// Builds the keyed client for a credential
pub type ClientFactory = Arc<dyn Fn(&str) -> Arc<dyn ChatBackend> + Send + Sync>;

pub struct CredentialRegistry {
    clients: DashMap<String, Arc<dyn ChatBackend>>,
    factory: ClientFactory,
}

impl CredentialRegistry {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            clients: DashMap::new(),
            factory,
        }
    }

    /// Return the client for `credential`, creating it on first use.
    /// Keys are compared exactly (case-sensitive, untrimmed).
    pub fn get_or_create(&self, credential: &str) -> Arc<dyn ChatBackend> {
        if let Some(client) = self.clients.get(credential) {
            return Arc::clone(client.value());
        }

        let entry = self.clients.entry(credential.to_string()).or_insert_with(|| {
            info!(credential = %mask_credential(credential), "Keyed client initialized");
            (self.factory)(credential)
        });
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Shorten a credential for log output
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
