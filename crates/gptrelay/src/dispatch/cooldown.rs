//! Session model cooldown
//!
//! When the session account exhausts its model quota the upstream answers
//! `429` with a capacity marker, optionally saying when the quota clears.
//! Until then the session backend falls back to the account tier's default
//! model. There is no timer: expiry is checked whenever session traffic
//! passes through [`ModelCooldown::resume_if_expired`].

use chrono::{TimeZone, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CooldownConfig;

/// Snapshot of the cooldown state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownState {
    pub is_limited: bool,
    /// Model served while limited
    pub fallback_model: String,
    /// Epoch milliseconds when the cooldown ends; 0 when none is active
    pub expires_at_ms: i64,
}

#[derive(Debug)]
struct Inner {
    limited: bool,
    expires_at_ms: i64,
}

#[derive(Debug)]
pub struct ModelCooldown {
    config: CooldownConfig,
    configured_model: Option<String>,
    fallback_model: String,
    inner: Mutex<Inner>,
}

impl ModelCooldown {
    /// `configured_model` is the session account's model (if any);
    /// `fallback_model` is what the account tier serves by default.
    pub fn new(
        config: CooldownConfig,
        configured_model: Option<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                limited: false,
                expires_at_ms: 0,
            }),
            configured_model,
            fallback_model: fallback_model.into(),
        }
    }

    pub fn capacity_marker(&self) -> &str {
        &self.config.capacity_marker
    }

    /// Whether `status_text` signals capacity exhaustion rather than plain throttling
    pub fn is_capacity_exceeded(&self, status_text: &str) -> bool {
        status_text.contains(&self.config.capacity_marker)
    }

    pub fn state(&self) -> CooldownState {
        let inner = self.lock();
        CooldownState {
            is_limited: inner.limited,
            fallback_model: self.fallback_model.clone(),
            expires_at_ms: inner.expires_at_ms,
        }
    }

    pub fn enter_limited(&self, status_text: &str) {
        self.enter_limited_at(status_text, Utc::now().timestamp_millis());
    }

    /// `Normal -> Limited`. Prefers the upstream's `clears_in` duration; without
    /// one, an already-running cooldown is left as is, otherwise the default
    /// window applies.
    pub fn enter_limited_at(&self, status_text: &str, now_ms: i64) {
        let clears_in = parse_clears_in(status_text);
        let mut inner = self.lock();
        inner.limited = true;

        if let Some(secs) = clears_in {
            let millis = i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
            inner.expires_at_ms = now_ms.saturating_add(millis);
        } else if inner.expires_at_ms == 0 {
            let window = Duration::from_secs(self.config.default_secs);
            inner.expires_at_ms = now_ms.saturating_add(window.as_millis() as i64);
        }

        warn!(
            clears_in = ?clears_in,
            expires_at = %format_ms(inner.expires_at_ms),
            "Session model capacity exceeded, falling back to {}",
            self.fallback_model
        );
    }

    pub fn resume_if_expired(&self) -> bool {
        self.resume_if_expired_at(Utc::now().timestamp_millis())
    }

    /// `Limited -> Normal` once the expiry has passed. Returns true when the
    /// configured model was restored by this call.
    pub fn resume_if_expired_at(&self, now_ms: i64) -> bool {
        let mut inner = self.lock();
        if inner.expires_at_ms == 0 {
            return false;
        }

        if inner.expires_at_ms < now_ms {
            inner.limited = false;
            inner.expires_at_ms = 0;
            info!("Session model cooldown expired, restored configured model");
            true
        } else {
            info!(
                expires_at = %format_ms(inner.expires_at_ms),
                "Session model cooldown still active"
            );
            false
        }
    }

    pub fn effective_model(&self, requested: Option<&str>) -> String {
        self.effective_model_at(requested, Utc::now().timestamp_millis())
    }

    /// Model to request from the session backend.
    ///
    /// A requested model is passed through as is; without one the backend's
    /// current default applies (the fallback while limited).
    pub fn effective_model_at(&self, requested: Option<&str>, now_ms: i64) -> String {
        self.resume_if_expired_at(now_ms);

        match requested.filter(|m| !m.is_empty()) {
            Some(model) => model.to_string(),
            None => self.current_model(),
        }
    }

    /// The session backend's default model in the current state
    pub fn current_model(&self) -> String {
        let inner = self.lock();
        match (&self.configured_model, inner.limited) {
            (Some(model), false) => model.clone(),
            _ => self.fallback_model.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Seconds from a `clears_in` marker: the first run of digits after it
pub fn parse_clears_in(status_text: &str) -> Option<u64> {
    let (_, rest) = status_text.split_once("clears_in")?;
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn format_ms(ms: i64) -> String {
    if ms == 0 {
        return "none".to_string();
    }
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
