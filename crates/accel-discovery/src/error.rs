use std::path::PathBuf;

use thiserror::Error;

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Why a single device entry was skipped.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected value '{value}' in {path}")]
    Parse { path: PathBuf, value: String },

    #[error("{0}")]
    Layout(String),
}
