//! Error types for cachetune

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving cache sizing
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A configured value has the wrong type or shape
    #[error("Configuration error: {path} {message}")]
    Configuration { path: String, message: String },

    /// An environment-sourced cache factor is not a number
    #[error("Invalid cache factor in environment variable {var}: {value:?}")]
    InvalidEnvFactor { var: String, value: String },

    /// Byte-size value could not be parsed
    #[error("Failed to parse size: {0}")]
    SizeParse(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML document could not be parsed
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Build a configuration error for the value at `path`
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Configuration {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The dotted configuration path this error refers to, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::Configuration { path, .. } => Some(path),
            _ => None,
        }
    }
}
