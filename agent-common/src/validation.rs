//! Configuration validation for the Agent gateway.
//!
//! Ensures required credentials are present and limits are within
//! usable ranges before the server starts.

use thiserror::Error;

use crate::config::{AgentApiConfig, Config, LoggingConfig, ServerConfig, SessionConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.agent.validate(),
            self.server.validate(),
            self.session.validate(),
            self.logging.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Config {
    /// Load and validate configuration.
    pub fn load_and_validate() -> crate::Result<Self> {
        let config = Self::load()?;
        config
            .validate()
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        Ok(config)
    }
}

impl Validate for AgentApiConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.app_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "agent.app_id (or AGENT_APP_ID)".into(),
            });
        }

        if self.api_key.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "agent.api_key (or AGENT_API_KEY)".into(),
            });
        }

        match url::Url::parse(&self.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ValidationError::InvalidValue {
                field: "agent.api_base_url".into(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => Err(ValidationError::InvalidValue {
                field: "agent.api_base_url".into(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }

        if self.model_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "server.model_id".into(),
            });
        }

        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_conversations == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.max_conversations".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.timeout == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.timeout".into(),
                reason: "must be at least 1 second".into(),
            });
        }

        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "logging.level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "logging.format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
