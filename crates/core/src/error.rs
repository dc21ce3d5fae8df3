//! Error types for the core crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`Config`](crate::Config).
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of range.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = std::result::Result<T, CoreError>;
