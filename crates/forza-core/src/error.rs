//! Error types for the `forza` core library.

use thiserror::Error;

/// Result type alias using `forza` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `forza` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML config file could not be parsed
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}
