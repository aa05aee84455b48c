//! Turn error taxonomy and classification of backend failures

use thiserror::Error;
use tracing::{error, warn};

use super::cooldown::ModelCooldown;
use crate::backend::BackendError;

/// User-facing category of a failed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMessageKey {
    RateLimitedCapacity,
    RateLimited,
    ConversationNotFound,
    Unauthorized,
    ClientOutdated,
    Unknown,
}

impl UserMessageKey {
    pub fn default_text(&self) -> &'static str {
        match self {
            UserMessageKey::RateLimitedCapacity | UserMessageKey::RateLimited => {
                "Too many people are using the service right now and the rate limit was hit 🔥, please try again later~"
            }
            UserMessageKey::ConversationNotFound => {
                "The conversation was lost 🤷, please close the chat and open it again to start a new conversation~"
            }
            UserMessageKey::Unauthorized => "No access permission",
            UserMessageKey::ClientOutdated => {
                "Your client is out of date, please upgrade to the latest version~"
            }
            UserMessageKey::Unknown => "Unknown error, please try again later~",
        }
    }
}

/// Why a turn did not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// No backend could be resolved for the turn
    #[error("No backend available: {0}")]
    Configuration(String),

    #[error("Client version {declared} is below the minimum {minimum}")]
    ClientOutdated { declared: String, minimum: String },

    #[error("Upstream rate limited: {0}")]
    UpstreamRateLimited(BackendError),

    #[error("Upstream model capacity exceeded: {0}")]
    UpstreamCapacityExceeded(BackendError),

    #[error("Upstream conversation not found: {0}")]
    UpstreamNotFound(BackendError),

    #[error("Upstream unauthorized: {0}")]
    UpstreamUnauthorized(BackendError),

    #[error("Upstream error: {0}")]
    UpstreamUnknown(BackendError),
}

impl TurnError {
    /// Map a backend failure by status code, then status text.
    ///
    /// Precedence: 429 (capacity marker, then plain) → 404 → 401 → unknown.
    pub fn from_backend(err: BackendError, capacity_marker: &str) -> Self {
        match err.status_code {
            Some(429) if err.status_text.contains(capacity_marker) => {
                TurnError::UpstreamCapacityExceeded(err)
            }
            Some(429) => TurnError::UpstreamRateLimited(err),
            Some(404) => TurnError::UpstreamNotFound(err),
            Some(401) => TurnError::UpstreamUnauthorized(err),
            _ => TurnError::UpstreamUnknown(err),
        }
    }

    pub fn category(&self) -> UserMessageKey {
        match self {
            TurnError::Configuration(_) => UserMessageKey::Unknown,
            TurnError::ClientOutdated { .. } => UserMessageKey::ClientOutdated,
            TurnError::UpstreamRateLimited(_) => UserMessageKey::RateLimited,
            TurnError::UpstreamCapacityExceeded(_) => UserMessageKey::RateLimitedCapacity,
            TurnError::UpstreamNotFound(_) => UserMessageKey::ConversationNotFound,
            TurnError::UpstreamUnauthorized(_) => UserMessageKey::Unauthorized,
            TurnError::UpstreamUnknown(_) => UserMessageKey::Unknown,
        }
    }

    /// Text of the single terminal message sent to the caller
    pub fn user_text(&self) -> String {
        match self {
            TurnError::Configuration(reason) => reason.clone(),
            TurnError::ClientOutdated { minimum, .. } => format!(
                "{} (minimum version {minimum})",
                UserMessageKey::ClientOutdated.default_text()
            ),
            TurnError::UpstreamUnknown(err) => {
                if !err.status_text.is_empty() {
                    err.status_text.clone()
                } else if !err.message.is_empty() {
                    err.message.clone()
                } else {
                    UserMessageKey::Unknown.default_text().to_string()
                }
            }
            other => other.category().default_text().to_string(),
        }
    }
}

/// Classify a backend failure for a turn. Capacity exhaustion from either
/// backend moves the cooldown to `Limited`.
pub fn classify(err: BackendError, cooldown: &ModelCooldown, is_session: bool) -> TurnError {
    let classified = TurnError::from_backend(err, cooldown.capacity_marker());

    match &classified {
        TurnError::UpstreamCapacityExceeded(err) => {
            warn!(
                backend = if is_session { "session" } else { "keyed" },
                status = ?err.status_code,
                status_text = %err.status_text,
                "Upstream model capacity exceeded"
            );
            cooldown.enter_limited(&err.status_text);
        }
        TurnError::UpstreamRateLimited(err) => {
            warn!(status_text = %err.status_text, "Upstream rate limited");
        }
        other => {
            error!(category = ?other.category(), error = %other, "Turn failed");
        }
    }

    classified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CooldownConfig;

    const MARKER: &str = "model_cap_exceeded";

    fn cooldown() -> ModelCooldown {
        ModelCooldown::new(
            CooldownConfig::default(),
            Some("gpt-4".to_string()),
            "text-davinci-002-render-paid",
        )
    }

    #[test]
    fn test_precedence_by_status_code() {
        let cases = [
            (BackendError::http(429, "model_cap_exceeded clears_in 5"), UserMessageKey::RateLimitedCapacity),
            (BackendError::http(429, "Too Many Requests"), UserMessageKey::RateLimited),
            (BackendError::http(404, "Not Found"), UserMessageKey::ConversationNotFound),
            (BackendError::http(401, "Unauthorized"), UserMessageKey::Unauthorized),
            (BackendError::http(500, "Internal Server Error"), UserMessageKey::Unknown),
            (BackendError::transport("connection reset"), UserMessageKey::Unknown),
        ];

        for (err, expected) in cases {
            assert_eq!(TurnError::from_backend(err, MARKER).category(), expected);
        }
    }

    #[test]
    fn test_unauthorized_gets_its_own_text() {
        let err = TurnError::from_backend(BackendError::http(401, "Unauthorized"), MARKER);
        assert_eq!(err.user_text(), "No access permission");
        assert_ne!(
            err.user_text(),
            UserMessageKey::ConversationNotFound.default_text()
        );
    }

    #[test]
    fn test_unknown_uses_upstream_text_verbatim() {
        let err = TurnError::from_backend(BackendError::http(502, "Bad Gateway"), MARKER);
        assert_eq!(err.user_text(), "Bad Gateway");

        let err = TurnError::from_backend(BackendError::transport("connection reset"), MARKER);
        assert_eq!(err.user_text(), "connection reset");

        let err = TurnError::from_backend(BackendError::transport(""), MARKER);
        assert_eq!(err.user_text(), UserMessageKey::Unknown.default_text());
    }

    #[test]
    fn test_capacity_drives_cooldown_for_session() {
        let cooldown = cooldown();
        let err = classify(
            BackendError::http(429, "model_cap_exceeded clears_in 120"),
            &cooldown,
            true,
        );

        assert_eq!(err.category(), UserMessageKey::RateLimitedCapacity);
        let state = cooldown.state();
        assert!(state.is_limited);
        assert!(state.expires_at_ms > 0);
    }

    #[test]
    fn test_plain_rate_limit_does_not_transition() {
        let cooldown = cooldown();
        classify(BackendError::http(429, "Too Many Requests"), &cooldown, true);
        assert!(!cooldown.state().is_limited);
    }

    #[test]
    fn test_keyed_capacity_error_also_enters_cooldown() {
        let cooldown = cooldown();
        let before = chrono::Utc::now().timestamp_millis();
        let err = classify(
            BackendError::http(429, "model_cap_exceeded clears_in 120"),
            &cooldown,
            false,
        );

        assert_eq!(err.category(), UserMessageKey::RateLimitedCapacity);
        let state = cooldown.state();
        assert!(state.is_limited);
        assert!(state.expires_at_ms >= before + 120_000);
    }

    #[test]
    fn test_configuration_and_outdated_categories() {
        let err = TurnError::Configuration("Please configure your apiKey".to_string());
        assert_eq!(err.category(), UserMessageKey::Unknown);
        assert_eq!(err.user_text(), "Please configure your apiKey");

        let err = TurnError::ClientOutdated {
            declared: "1.0.0".to_string(),
            minimum: "2.0.0".to_string(),
        };
        assert_eq!(err.category(), UserMessageKey::ClientOutdated);
        assert!(err.user_text().contains("2.0.0"));
    }
}
