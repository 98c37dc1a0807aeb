//! Error types for Wormhole Core

use thiserror::Error;

use crate::models::TicketId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ticket {0} was already claimed by another assistant")]
    AlreadyClaimed(TicketId),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the caller may retry the same request with backoff.
    ///
    /// Everything except a store failure is a routine, deterministic outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
