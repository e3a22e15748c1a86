use std::io;

use config::ConfigError;
use thiserror::Error;

pub(crate) type ApplicationResult<T> = Result<T, ApplicationError>;

/// Fatal startup errors. Everything after startup is handled in place and
/// surfaced through logs and the status snapshot.
#[derive(Debug, Error)]
pub(crate) enum ApplicationError {
    #[error("Error regarding config: {0}")]
    Config(#[from] ConfigError),
    #[error("System input/output error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to read station database: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}
