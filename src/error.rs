// src/error.rs

use thiserror::Error;

/// Core error types for sw-collector
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// The store could not start an enumeration
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Missing or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Settings file is not valid TOML
    #[error("Failed to parse settings: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// History log missing or unreadable
    #[error("History log unavailable: {0}")]
    LogUnavailable(String),

    /// A history line violates the `Label: value` grammar
    #[error("Malformed history line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    /// A Start-Date value could not be parsed
    #[error("Unable to parse timestamp on line {line}: '{value}'")]
    TimestampParse { line: usize, value: String },

    /// The remote verifier rejected a request
    #[error("Remote call failed: {0}")]
    RemoteCall(String),
}

/// Result type alias using sw-collector's Error type
pub type Result<T> = std::result::Result<T, Error>;
