//! Node state error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("could not find allocatable device {device} (pool {pool})")]
    UnknownDevice {
        claim: String,
        device: String,
        pool: String,
    },

    #[error("claim {claim}: {source}")]
    Allocation {
        claim: String,
        #[source]
        source: accel_alloc::AllocError,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] accel_ledger::LedgerError),

    #[error("CDI registry error: {0}")]
    Cdi(#[from] accel_cdi::CdiError),

    #[error("failed to publish resources: {0}")]
    Publish(#[from] anyhow::Error),
}

pub type NodeResult<T> = Result<T, NodeError>;
