use std::path::PathBuf;

use thiserror::Error;

pub type HealthResult<T> = Result<T, HealthError>;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("device {device}: invalid {category} health status {code}")]
    InvalidStatus {
        device: String,
        category: String,
        code: u32,
    },

    #[error("unknown health category '{0}'")]
    UnknownCategory(String),

    #[error("telemetry read {path}: {source}")]
    TelemetryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("telemetry parse {path}: {source}")]
    TelemetryParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("marker {name}: {source}")]
    Marker {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to publish resources: {0}")]
    Node(#[from] accel_node::NodeError),
}
