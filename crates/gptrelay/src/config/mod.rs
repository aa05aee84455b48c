use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for gptrelay
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Key-authenticated API backend configuration
    #[serde(default)]
    pub keyed: KeyedConfig,
    /// Shared session backend configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Capacity cooldown configuration
    #[serde(default)]
    pub cooldown: CooldownConfig,
    /// Admin and web-client authentication
    #[serde(default)]
    pub auth: AuthConfig,
    /// Inbound client requirements
    #[serde(default)]
    pub client: ClientConfig,
    /// Turn audit log configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

/// Key-authenticated backend configuration (OpenAI-compatible API)
#[derive(Debug, Clone, Deserialize)]
pub struct KeyedConfig {
    /// API base URL; `/chat/completions` is appended
    #[serde(default = "default_keyed_api_url")]
    pub api_url: String,
    /// Model used by every keyed client
    #[serde(default = "default_keyed_model")]
    pub model: String,
    /// Environment variable holding the default credential
    #[serde(default = "default_api_key_env")]
    pub default_api_key_env: String,
    /// Optional system message prepended to every conversation
    #[serde(default)]
    pub system_message: Option<String>,
    /// Messages retained per client for parent-message lookups
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Maximum number of prior messages replayed as context
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
}

impl Default for KeyedConfig {
    fn default() -> Self {
        Self {
            api_url: default_keyed_api_url(),
            model: default_keyed_model(),
            default_api_key_env: default_api_key_env(),
            system_message: None,
            history_capacity: default_history_capacity(),
            max_context_messages: default_max_context_messages(),
        }
    }
}

fn default_keyed_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_keyed_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_history_capacity() -> usize {
    1000
}

fn default_max_context_messages() -> usize {
    20
}

/// Shared session backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Create the shared session client at startup
    #[serde(default)]
    pub enabled: bool,
    /// Conversation endpoint base; `/conversation` is appended
    #[serde(default = "default_session_api_url")]
    pub api_url: String,
    /// Environment variable holding the session access token
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    /// Model configured for the session account (e.g. "gpt-4")
    #[serde(default)]
    pub account_model: Option<String>,
    /// Whether the session account is on the paid tier
    #[serde(default)]
    pub plus_account: bool,
    /// Initial mode: resolve absent credentials to the session backend.
    /// Defaults to true when no default credential is configured.
    #[serde(default)]
    pub prefer_by_default: Option<bool>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_session_api_url(),
            access_token_env: default_access_token_env(),
            account_model: None,
            plus_account: false,
            prefer_by_default: None,
        }
    }
}

impl SessionConfig {
    /// Default model of the session account tier
    pub fn tier_model(&self) -> &'static str {
        if self.plus_account {
            "text-davinci-002-render-paid"
        } else {
            "text-davinci-002-render-sha"
        }
    }
}

fn default_session_api_url() -> String {
    "https://chat.openai.com/backend-api".to_string()
}

fn default_access_token_env() -> String {
    "OPENAI_ACCESS_TOKEN".to_string()
}

/// Capacity cooldown configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    /// Substring of the upstream status text that marks capacity exhaustion
    #[serde(default = "default_capacity_marker")]
    pub capacity_marker: String,
    /// Cooldown applied when the upstream gives no `clears_in` duration
    #[serde(default = "default_cooldown_secs")]
    pub default_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            capacity_marker: default_capacity_marker(),
            default_secs: default_cooldown_secs(),
        }
    }
}

fn default_capacity_marker() -> String {
    "model_cap_exceeded".to_string()
}

fn default_cooldown_secs() -> u64 {
    4 * 60 * 60
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the admin key (unset = admin routes open)
    #[serde(default = "default_api_key_env")]
    pub admin_key_env: String,
    /// Environment variable holding the web-client verification secret
    #[serde(default = "default_web_secret_env")]
    pub web_secret_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_key_env: default_api_key_env(),
            web_secret_env: default_web_secret_env(),
        }
    }
}

fn default_web_secret_env() -> String {
    "CHATGPT_WEB_AUTH_SECRET_KEY".to_string()
}

/// Inbound client requirements
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientConfig {
    /// Minimum accepted `clientVersion` (semver); unset disables the gate
    #[serde(default)]
    pub min_version: Option<String>,
}

/// Turn audit log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Persist completed turns
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// JSON-lines file receiving one entry per completed turn
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            path: default_log_path(),
        }
    }
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".gptrelay").join("turns.jsonl"))
        .unwrap_or_else(|| PathBuf::from(".gptrelay/turns.jsonl"))
}

/// Read a non-empty secret from the environment variable `name`
pub fn read_env_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8000");
        assert_eq!(config.server.timeout_secs, 300);
        assert_eq!(config.keyed.api_url, "https://api.openai.com/v1");
        assert_eq!(config.keyed.model, "gpt-3.5-turbo");
        assert_eq!(config.keyed.default_api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.keyed.history_capacity, 1000);
        assert!(!config.session.enabled);
        assert!(config.session.account_model.is_none());
        assert!(config.session.prefer_by_default.is_none());
        assert_eq!(config.cooldown.capacity_marker, "model_cap_exceeded");
        assert_eq!(config.cooldown.default_secs, 14400);
        assert!(config.client.min_version.is_none());
        assert!(config.log.enabled);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[server]
listen_addr = "0.0.0.0:8080"
timeout_secs = 60

[keyed]
api_url = "http://localhost:1234/v1"
model = "gpt-4o-mini"
system_message = "Be brief."

[session]
enabled = true
api_url = "http://localhost:5678/api"
account_model = "gpt-4"
plus_account = true
prefer_by_default = false

[cooldown]
default_secs = 600

[client]
min_version = "1.2.0"

[log]
enabled = false
path = "/tmp/turns.jsonl"
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.server.timeout_secs, 60);
        assert_eq!(config.keyed.api_url, "http://localhost:1234/v1");
        assert_eq!(config.keyed.model, "gpt-4o-mini");
        assert_eq!(config.keyed.system_message.as_deref(), Some("Be brief."));
        assert!(config.session.enabled);
        assert_eq!(config.session.account_model.as_deref(), Some("gpt-4"));
        assert_eq!(config.session.tier_model(), "text-davinci-002-render-paid");
        assert_eq!(config.session.prefer_by_default, Some(false));
        assert_eq!(config.cooldown.default_secs, 600);
        assert_eq!(config.cooldown.capacity_marker, "model_cap_exceeded");
        assert_eq!(config.client.min_version.as_deref(), Some("1.2.0"));
        assert!(!config.log.enabled);
        assert_eq!(config.log.path, PathBuf::from("/tmp/turns.jsonl"));
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[session]
enabled = true
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse partial TOML");

        assert!(config.session.enabled);
        assert_eq!(config.session.tier_model(), "text-davinci-002-render-sha");
        assert_eq!(config.server.listen_addr, "127.0.0.1:8000");
        assert_eq!(config.keyed.model, "gpt-3.5-turbo");
        assert_eq!(config.auth.admin_key_env, "OPENAI_API_KEY");
        assert_eq!(config.auth.web_secret_env, "CHATGPT_WEB_AUTH_SECRET_KEY");
    }

    #[test]
    fn test_read_env_secret_ignores_blank_values() {
        unsafe { std::env::set_var("GPTRELAY_TEST_BLANK_SECRET", "   ") };
        assert!(read_env_secret("GPTRELAY_TEST_BLANK_SECRET").is_none());

        unsafe { std::env::set_var("GPTRELAY_TEST_SECRET", " sk-123 ") };
        assert_eq!(
            read_env_secret("GPTRELAY_TEST_SECRET").as_deref(),
            Some("sk-123")
        );

        assert!(read_env_secret("GPTRELAY_TEST_SECRET_NEVER_SET").is_none());
    }
}
