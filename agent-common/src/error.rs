//! Error types shared by the Agent gateway crates.

use thiserror::Error;

/// Result type alias using the common error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for configuration and startup.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_context() {
        let err = Error::Config("agent.app_id missing".into());
        let with_ctx = err.with_context("loading settings");
        assert!(matches!(with_ctx, Error::WithContext { .. }));
        assert!(with_ctx.to_string().starts_with("loading settings"));
    }

    #[test]
    fn test_result_ext_wraps_io_error() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = result.context("reading config.yaml").unwrap_err();
        assert!(err.to_string().contains("reading config.yaml"));
        assert!(matches!(err, Error::WithContext { .. }));
    }

    #[test]
    fn test_yaml_error_keeps_source() {
        let yaml_err = serde_yaml::from_str::<u32>("[not a number").unwrap_err();
        let err = Error::from(yaml_err).with_context("parsing config.yaml");
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().starts_with("YAML error"));
    }
}
