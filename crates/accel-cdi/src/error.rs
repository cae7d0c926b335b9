use std::path::PathBuf;

use thiserror::Error;

pub type CdiResult<T> = Result<T, CdiError>;

#[derive(Debug, Error)]
pub enum CdiError {
    #[error("CDI registry I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CDI spec {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize CDI spec {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
