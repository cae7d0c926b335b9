use thiserror::Error;

pub type AllocResult<T> = Result<T, AllocError>;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("no compatible device '{device}' with services '{services}' for claim {claimant}")]
    NoCompatibleDevice {
        device: String,
        services: String,
        claimant: String,
    },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("device '{0}' is not allocated")]
    NotAllocated(String),

    #[error("device '{device}' is allocated to claim {owner}, not {claimant}")]
    WrongClaimant {
        device: String,
        owner: String,
        claimant: String,
    },

    #[error("empty claimant for device '{0}'")]
    EmptyClaimant(String),

    #[error("failed to set services '{services}' on {pf}: {source}")]
    Reconfigure {
        pf: String,
        services: String,
        #[source]
        source: std::io::Error,
    },
}
