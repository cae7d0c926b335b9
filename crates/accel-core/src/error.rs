use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported service '{0}'")]
    UnknownService(String),

    #[error("unknown naming style '{0}'")]
    UnknownNamingStyle(String),

    #[error("unknown accelerator family '{0}'")]
    UnknownFamily(String),
}
