//! Error types for NAS Sentinel

use std::fmt;

/// Main error type for the sentinel crate
#[derive(Debug)]
pub enum SentinelError {
    /// IO related errors
    Io { source: std::io::Error },

    /// Serialization/deserialization errors
    Serialization { source: Box<dyn std::error::Error + Send + Sync> },

    /// Appliance API errors
    Api { source: crate::api::ApiError },

    /// Configuration errors
    ConfigError(String),

    /// Persistent store errors
    StoreError(String),

    /// Invalid input provided to a function
    InvalidInput(String),

    /// Generic error with custom message
    Other(String),
}

impl fmt::Display for SentinelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentinelError::Io { source } => write!(f, "IO error: {}", source),
            SentinelError::Serialization { source } => write!(f, "Serialization error: {}", source),
            SentinelError::Api { source } => write!(f, "API error: {}", source),
            SentinelError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            SentinelError::StoreError(msg) => write!(f, "Store error: {}", msg),
            SentinelError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            SentinelError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for SentinelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SentinelError::Io { source } => Some(source),
            SentinelError::Serialization { source } => Some(source.as_ref()),
            SentinelError::Api { source } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SentinelError {
    fn from(error: std::io::Error) -> Self {
        SentinelError::Io { source: error }
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(error: serde_json::Error) -> Self {
        SentinelError::Serialization { source: Box::new(error) }
    }
}

impl From<serde_yaml::Error> for SentinelError {
    fn from(error: serde_yaml::Error) -> Self {
        SentinelError::Serialization { source: Box::new(error) }
    }
}

impl From<crate::api::ApiError> for SentinelError {
    fn from(error: crate::api::ApiError) -> Self {
        SentinelError::Api { source: error }
    }
}

/// Result type for the sentinel crate
pub type Result<T> = std::result::Result<T, SentinelError>;
