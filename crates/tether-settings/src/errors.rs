//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings load was refused.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse failure.
        source: serde_json::Error,
    },
    /// The merged document does not fit the settings shape
    /// (for example a string where a number belongs).
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A value is outside what the server or client can run with.
    #[error("invalid settings value: {0}")]
    Invalid(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
