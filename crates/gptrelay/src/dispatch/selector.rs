//! Backend selection for a turn

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::classify::TurnError;
use super::registry::CredentialRegistry;
use crate::backend::ChatBackend;

pub const NO_BACKEND_MESSAGE: &str = "Please configure your apiKey";

/// The client chosen for a turn
#[derive(Clone)]
pub struct Selection {
    pub client: Arc<dyn ChatBackend>,
    pub is_session: bool,
    /// Credential the keyed client was resolved with
    pub credential: Option<String>,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("kind", &self.client.kind())
            .field("is_session", &self.is_session)
            .finish()
    }
}

pub struct BackendSelector {
    registry: CredentialRegistry,
    session: Option<Arc<dyn ChatBackend>>,
    default_credential: Option<String>,
    /// When set, an absent credential resolves to the session backend
    prefer_session: AtomicBool,
}

impl BackendSelector {
    pub fn new(
        registry: CredentialRegistry,
        session: Option<Arc<dyn ChatBackend>>,
        default_credential: Option<String>,
        prefer_session: bool,
    ) -> Self {
        Self {
            registry,
            session,
            default_credential: default_credential.filter(|c| !c.is_empty()),
            prefer_session: AtomicBool::new(prefer_session),
        }
    }

    /// Resolve the client for a turn.
    ///
    /// An explicit credential always wins; otherwise the mode decides between
    /// the default credential and the shared session.
    pub fn select(&self, credential: Option<&str>) -> Result<Selection, TurnError> {
        let effective = credential
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .or_else(|| {
                if self.prefers_session() {
                    None
                } else {
                    self.default_credential.clone()
                }
            });

        if let Some(credential) = effective {
            debug!("Routing turn to keyed backend");
            return Ok(Selection {
                client: self.registry.get_or_create(&credential),
                is_session: false,
                credential: Some(credential),
            });
        }

        if let Some(ref session) = self.session {
            debug!("Routing turn to session backend");
            return Ok(Selection {
                client: Arc::clone(session),
                is_session: true,
                credential: None,
            });
        }

        Err(TurnError::Configuration(NO_BACKEND_MESSAGE.to_string()))
    }

    pub fn prefers_session(&self) -> bool {
        self.prefer_session.load(Ordering::SeqCst)
    }

    /// Flip the default mode, returning the new value
    pub fn toggle_mode(&self) -> bool {
        !self.prefer_session.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn registry(&self) -> &CredentialRegistry {
        &self.registry
    }
}
