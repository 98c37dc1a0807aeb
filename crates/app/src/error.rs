//! Service-level error type

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] wormhole_core::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] wormhole_core::ArchiveError),

    #[error("Network error: {0}")]
    Net(#[from] wormhole_net::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
