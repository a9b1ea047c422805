//! Error types for tapto-core operations.
//!
//! Nothing in the session core is fatal: these errors are logged, retried,
//! or turned into audible feedback by the caller.

use std::path::PathBuf;

/// Errors raised while loading configuration and mapping files.
#[derive(Debug, thiserror::Error)]
pub enum TaptoError {
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Mappings file malformed: {path}: {details}")]
    MappingsMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reported by a reader driver, either while connecting or as a
/// scan event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReaderError {
    #[error("no reader detected")]
    NoReaderDetected,

    #[error("failed to open reader {device}: {details}")]
    OpenFailed { device: String, details: String },

    #[error("failed to read token: {0}")]
    ReadFailed(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("failed to close reader: {0}")]
    CloseFailed(String),
}

/// Errors from platform capabilities (launching, killing, sounds).
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{0} command is not configured")]
    NotConfigured(&'static str),

    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },
}

/// Convenience type alias for Results using TaptoError.
pub type Result<T> = std::result::Result<T, TaptoError>;

impl From<TaptoError> for String {
    fn from(err: TaptoError) -> String {
        err.to_string()
    }
}
