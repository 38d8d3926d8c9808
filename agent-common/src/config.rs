//! Configuration management for the Agent gateway.
//!
//! Settings come from a YAML file plus environment overrides.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Values from the first config file found
//! 3. Default values
//!
//! # File Discovery
//!
//! The first readable, parseable candidate wins:
//! - `$AGENT_CONFIG_FILE`
//! - `$AGENT_CONFIG_DIR/config.local.yaml`, `$AGENT_CONFIG_DIR/config.yaml`
//! - `./config.local.yaml`, `./config.yaml`
//!
//! # Environment Variable Mapping
//!
//! - `AGENT_API_BASE_URL` → agent.api_base_url
//! - `AGENT_APP_ID` → agent.app_id
//! - `AGENT_API_KEY` → agent.api_key
//! - `SERVER_HOST` → server.host
//! - `SERVER_PORT` → server.port
//! - `API_AUTH_KEY` → server.auth_key
//! - `MAX_CONVERSATIONS` → session.max_conversations
//! - `CONVERSATION_TIMEOUT` → session.timeout
//! - `SESSION_KEYING` → session.keying
//! - `LOG_LEVEL` → logging.level
//! - `LOG_FORMAT` → logging.format
//! - `VERBOSE_LOGGING` → logging.verbose

use crate::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_FILE: &str = "AGENT_CONFIG_FILE";

/// Environment variable naming a directory to search for config files.
pub const ENV_CONFIG_DIR: &str = "AGENT_CONFIG_DIR";

/// File names searched in each config directory, in priority order.
pub const DEFAULT_CONFIG_FILENAMES: &[&str] = &["config.local.yaml", "config.yaml"];

// ============================================================================
// Agent API (backend) Configuration
// ============================================================================

/// Connection settings for the upstream Agent API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentApiConfig {
    /// Base URL of the Agent API, without trailing path.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Application id issued by the Agent platform.
    #[serde(default)]
    pub app_id: String,

    /// Key sent in the `Apikey` header.
    #[serde(default)]
    pub api_key: String,
}

impl Default for AgentApiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            app_id: String::new(),
            api_key: String::new(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://agent.bit.edu.cn".into()
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP listener and caller-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token callers must present. Empty or absent disables auth.
    #[serde(default)]
    pub auth_key: Option<String>,

    /// Model id advertised on `/v1/models`.
    #[serde(default = "default_model_id")]
    pub model_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_key: None,
            model_id: default_model_id(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_model_id() -> String {
    "agent-model".into()
}

// ============================================================================
// Session Configuration
// ============================================================================

/// How the gateway derives the session id that keys the conversation store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKeying {
    /// A fresh random id for every request.
    #[default]
    PerRequest,
    /// The caller's `X-Session-Id` header, fresh id when absent.
    Header,
    /// The OpenAI `user` request field, fresh id when absent.
    User,
}

impl SessionKeying {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PerRequest => "per_request",
            Self::Header => "header",
            Self::User => "user",
        }
    }
}

impl FromStr for SessionKeying {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_request" => Ok(Self::PerRequest),
            "header" => Ok(Self::Header),
            "user" => Ok(Self::User),
            other => Err(Error::Config(format!(
                "unknown session keying '{}': expected per_request, header or user",
                other
            ))),
        }
    }
}

/// Conversation store limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of live conversation mappings.
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    /// Idle timeout in seconds before a mapping is evicted.
    #[serde(default = "default_conversation_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub keying: SessionKeying,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
            timeout: default_conversation_timeout(),
            keying: SessionKeying::default(),
        }
    }
}

fn default_max_conversations() -> usize {
    1000
}

fn default_conversation_timeout() -> u64 {
    3600
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "log_format")]
    pub format: String,

    /// Log raw backend lines, parsed events and emitted deltas.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            verbose: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentApiConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Discover the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let candidates = candidate_paths(
            std::env::var_os(ENV_CONFIG_FILE).map(PathBuf::from),
            std::env::var_os(ENV_CONFIG_DIR).map(PathBuf::from),
            &cwd,
        );

        let mut config = Self::discover(&candidates);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        let mut config: Self = serde_yaml::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load the first usable candidate, falling back to defaults.
    ///
    /// Missing files are skipped quietly; unreadable or malformed ones are
    /// skipped with a warning.
    pub fn discover(candidates: &[PathBuf]) -> Self {
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match Self::load_from(path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config file");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping config file");
                }
            }
        }

        tracing::info!("Config file not found, using defaults");
        Self::default()
    }

    /// Apply process environment overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("AGENT_API_BASE_URL") {
            self.agent.api_base_url = url;
        }
        if let Some(app_id) = lookup("AGENT_APP_ID") {
            self.agent.app_id = app_id;
        }
        if let Some(key) = lookup("AGENT_API_KEY") {
            self.agent.api_key = key;
        }

        if let Some(host) = lookup("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_override(&lookup, "SERVER_PORT") {
            self.server.port = port;
        }
        if let Some(key) = lookup("API_AUTH_KEY") {
            self.server.auth_key = Some(key);
        }

        if let Some(max) = parse_override(&lookup, "MAX_CONVERSATIONS") {
            self.session.max_conversations = max;
        }
        if let Some(timeout) = parse_override(&lookup, "CONVERSATION_TIMEOUT") {
            self.session.timeout = timeout;
        }
        if let Some(keying) = parse_override(&lookup, "SESSION_KEYING") {
            self.session.keying = keying;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format.to_lowercase();
        }
        if let Some(verbose) = lookup("VERBOSE_LOGGING") {
            self.logging.verbose = matches!(
                verbose.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    // =========================================================================
    // Convenience accessors
    // =========================================================================

    /// Socket address string the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Caller bearer token, `None` when auth is disabled.
    pub fn auth_key(&self) -> Option<&str> {
        self.server
            .auth_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout)
    }

    /// Log the effective settings without revealing secrets.
    pub fn log_summary(&self) {
        let app_id_prefix: String = self.agent.app_id.chars().take(8).collect();
        tracing::info!(
            source = %self
                .source
                .as_ref()
                .map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string()),
            api_base_url = %self.agent.api_base_url,
            app_id = %format!("{}...", app_id_prefix),
            api_key_set = !self.agent.api_key.is_empty(),
            bind = %self.bind_address(),
            auth_enabled = self.auth_key().is_some(),
            max_conversations = self.session.max_conversations,
            conversation_timeout_secs = self.session.timeout,
            session_keying = self.session.keying.as_str(),
            "Configuration loaded"
        );
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Build the ordered, de-duplicated list of config file candidates.
pub fn candidate_paths(
    explicit_file: Option<PathBuf>,
    explicit_dir: Option<PathBuf>,
    cwd: &Path,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(file) = explicit_file {
        candidates.push(file);
    }

    if let Some(dir) = explicit_dir {
        candidates.extend(DEFAULT_CONFIG_FILENAMES.iter().map(|name| dir.join(name)));
    }

    candidates.extend(DEFAULT_CONFIG_FILENAMES.iter().map(|name| cwd.join(name)));

    let mut seen = Vec::new();
    candidates.retain(|path| {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.api_base_url, "https://agent.bit.edu.cn");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.session.max_conversations, 1000);
        assert_eq!(config.session.timeout, 3600);
        assert_eq!(config.session.keying, SessionKeying::PerRequest);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.verbose);
        assert!(config.auth_key().is_none());
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "config.yaml",
            r#"
agent:
  api_base_url: "http://127.0.0.1:9000"
  app_id: "app-1234567890"
  api_key: "secret"
server:
  port: 9100
  auth_key: "sk-local"
session:
  max_conversations: 5
  timeout: 60
  keying: header
logging:
  level: debug
  verbose: true
"#,
        );

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.agent.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.agent.app_id, "app-1234567890");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.auth_key(), Some("sk-local"));
        assert_eq!(config.session.max_conversations, 5);
        assert_eq!(config.conversation_timeout(), Duration::from_secs(60));
        assert_eq!(config.session.keying, SessionKeying::Header);
        assert!(config.logging.verbose);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_empty_auth_key_disables_auth() {
        let mut config = Config::default();
        config.server.auth_key = Some("  ".into());
        assert!(config.auth_key().is_none());
    }

    #[test]
    fn test_candidate_order_and_dedup() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("config.yaml");
        let candidates = candidate_paths(
            Some(explicit.clone()),
            Some(dir.path().to_path_buf()),
            Path::new("/nonexistent-cwd"),
        );

        assert_eq!(candidates[0], explicit);
        assert_eq!(candidates[1], dir.path().join("config.local.yaml"));
        // config.yaml in the dir is the same path as the explicit file
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[2], PathBuf::from("/nonexistent-cwd/config.local.yaml"));
    }

    #[test]
    fn test_discover_prefers_local_and_skips_broken() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "config.local.yaml", "agent: [this is: not valid");
        write(dir.path(), "config.yaml", "agent:\n  app_id: from-config-yaml\n");

        let candidates = candidate_paths(None, Some(dir.path().to_path_buf()), dir.path());
        let config = Config::discover(&candidates);
        assert_eq!(config.agent.app_id, "from-config-yaml");
    }

    #[test]
    fn test_discover_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let candidates = candidate_paths(None, None, dir.path());
        let config = Config::discover(&candidates);
        assert!(config.source.is_none());
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AGENT_APP_ID", "env-app"),
            ("AGENT_API_KEY", "env-key"),
            ("SERVER_PORT", "8123"),
            ("MAX_CONVERSATIONS", "42"),
            ("CONVERSATION_TIMEOUT", "not-a-number"),
            ("SESSION_KEYING", "user"),
            ("LOG_LEVEL", "DEBUG"),
            ("VERBOSE_LOGGING", "true"),
        ]);

        let mut config = Config::default();
        config.apply_overrides_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.agent.app_id, "env-app");
        assert_eq!(config.agent.api_key, "env-key");
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.session.max_conversations, 42);
        // Unparseable values leave the previous setting in place
        assert_eq!(config.session.timeout, 3600);
        assert_eq!(config.session.keying, SessionKeying::User);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.verbose);
    }

    #[test]
    fn test_session_keying_from_str() {
        assert_eq!("per-request".parse::<SessionKeying>().unwrap(), SessionKeying::PerRequest);
        assert_eq!("Header".parse::<SessionKeying>().unwrap(), SessionKeying::Header);
        assert!("cookie".parse::<SessionKeying>().is_err());
    }
}
