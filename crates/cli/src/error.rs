//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configured account data directory does not exist.
    #[error("data directory not found at {path}")]
    DataDirNotFound { path: PathBuf },

    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The own handle is neither configured nor derivable from the data
    /// directory name.
    #[error("cannot derive own handle from {path}; set self_handle")]
    UnknownSelf { path: PathBuf },

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// An error occurred in the tail loop.
    #[error(transparent)]
    Tail(#[from] tail::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
