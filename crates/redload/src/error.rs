//! Error types for the load-and-transform pipeline
//!
//! Every variant is fatal to a run. Nothing in the crate retries or
//! downgrades an error; the binary logs it and exits non-zero.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadError>;

#[derive(Error, Debug)]
pub enum LoadError {
    /// The database session could not be established
    #[error("Unable to connect to Redshift at {host}:{port}/{dbname}: {source}")]
    Connection {
        host: String,
        port: u16,
        dbname: String,
        #[source]
        source: sqlx::Error,
    },

    /// A statement failed; `statement` is the masked statement text
    #[error("Unable to execute statement [{statement}]: {source}")]
    Execution {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error(
        "Source files '{first}' and '{second}' both map to table '{table}'. Rename one of them."
    )]
    DuplicateTableName {
        table: String,
        first: String,
        second: String,
    },

    #[error("Invalid identifier '{0}': expected a letter or underscore followed by letters, digits, '_' or '$' (max 127 bytes)")]
    InvalidIdentifier(String),

    #[error("Invalid column type '{column_type}' for column '{column}'")]
    InvalidType { column: String, column_type: String },

    #[error("Invalid SQL literal for {0}: backslashes and control characters are not allowed")]
    InvalidLiteral(&'static str),

    #[error("Header of '{file}' does not match its declared columns: expected [{}], found [{}]", .expected.join(","), .actual.join(","))]
    HeaderMismatch {
        file: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Object storage error for '{key}': {message}")]
    Storage { key: String, message: String },

    #[error("Load phase failed for {} file(s): {}", .failures.len(), .failures.join("; "))]
    LoadPhaseFailed { failures: Vec<String> },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn storage(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error came from the database session
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Execution { .. })
    }
}
