//! Error types shared across redload crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid logging setting {name}: '{value}'")]
    InvalidLogSetting { name: &'static str, value: String },

    #[error("Invalid log filter directive: {0}")]
    InvalidFilter(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

impl CommonError {
    pub fn invalid_setting(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidLogSetting {
            name,
            value: value.into(),
        }
    }
}
