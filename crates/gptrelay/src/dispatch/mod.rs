//! Dispatch-and-recovery core
//!
//! A turn flows through the [`BackendSelector`] (backed by the
//! [`CredentialRegistry`]), picks its model from the [`ModelCooldown`], runs
//! through [`relay_turn`], and on failure is mapped by [`classify`].

pub mod classify;
pub mod cooldown;
pub mod registry;
pub mod relay;
pub mod selector;

pub use classify::{TurnError, UserMessageKey, classify};
pub use cooldown::{CooldownState, ModelCooldown};
pub use registry::{ClientFactory, CredentialRegistry, mask_credential};
pub use relay::{RelayFrame, relay_turn};
pub use selector::{BackendSelector, Selection};

use semver::Version;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{self, TurnLog};
use crate::backend::{ChatBackend, KeyedClient, SessionClient};
use crate::config::{Config, read_env_secret};
use crate::error::{RelayError, Result};

/// Process-wide state shared by every turn
pub struct RelayContext {
    pub selector: BackendSelector,
    pub cooldown: ModelCooldown,
    /// Model used by keyed clients when a turn requests none
    pub keyed_model: String,
    pub min_client_version: Option<Version>,
    pub turn_log: Arc<dyn TurnLog>,
}

impl RelayContext {
    pub fn new(
        selector: BackendSelector,
        cooldown: ModelCooldown,
        keyed_model: impl Into<String>,
        turn_log: Arc<dyn TurnLog>,
    ) -> Self {
        Self {
            selector,
            cooldown,
            keyed_model: keyed_model.into(),
            min_client_version: None,
            turn_log,
        }
    }

    pub fn with_min_client_version(mut self, version: Version) -> Self {
        self.min_client_version = Some(version);
        self
    }

    /// Wire up backends, cooldown and audit log from configuration.
    ///
    /// The session backend is only created when enabled and its access token
    /// is present in the environment.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self> {
        let keyed_config = config.keyed.clone();
        let factory_http = http.clone();
        let factory: ClientFactory = Arc::new(move |credential: &str| {
            Arc::new(KeyedClient::new(factory_http.clone(), &keyed_config, credential))
                as Arc<dyn ChatBackend>
        });

        let session = if config.session.enabled {
            match read_env_secret(&config.session.access_token_env) {
                Some(token) => {
                    Some(Arc::new(SessionClient::new(http, &config.session, &token))
                        as Arc<dyn ChatBackend>)
                }
                None => {
                    warn!(
                        "Session backend enabled but {} is not set; running without it",
                        config.session.access_token_env
                    );
                    None
                }
            }
        } else {
            None
        };

        let default_credential = read_env_secret(&config.keyed.default_api_key_env);
        let prefer_session = config
            .session
            .prefer_by_default
            .unwrap_or(default_credential.is_none());
        info!(
            session = session.is_some(),
            default_credential = default_credential.is_some(),
            prefer_session,
            "Backends configured"
        );

        let selector = BackendSelector::new(
            CredentialRegistry::new(factory),
            session,
            default_credential,
            prefer_session,
        );
        let cooldown = ModelCooldown::new(
            config.cooldown.clone(),
            config.session.account_model.clone(),
            config.session.tier_model(),
        );

        let mut ctx = Self::new(
            selector,
            cooldown,
            config.keyed.model.clone(),
            audit::from_config(&config.log),
        );
        if let Some(ref raw) = config.client.min_version {
            let version = parse_version(raw).ok_or_else(|| {
                RelayError::Config(format!("Invalid client.min_version: {raw}"))
            })?;
            ctx = ctx.with_min_client_version(version);
        }
        Ok(ctx)
    }

    /// Gate a turn on the caller's declared client version.
    ///
    /// Turns without a declared version pass; unparseable versions are
    /// treated as outdated.
    pub fn check_client_version(&self, declared: Option<&str>) -> std::result::Result<(), TurnError> {
        let (Some(minimum), Some(declared)) = (&self.min_client_version, declared) else {
            return Ok(());
        };

        match parse_version(declared) {
            Some(version) if version >= *minimum => Ok(()),
            _ => {
                warn!(declared, minimum = %minimum, "Rejecting outdated client");
                Err(TurnError::ClientOutdated {
                    declared: declared.to_string(),
                    minimum: minimum.to_string(),
                })
            }
        }
    }
}

fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}
