//! Core error types for SSH Attachments RS

use thiserror::Error;

/// Configuration error
///
/// Raised while loading or validating a [`crate::RemoteConfig`]. A backend is
/// never constructed from a configuration that failed with one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Environment not configured: {0}")]
    MissingEnvironment(String),
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
