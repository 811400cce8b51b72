//! Error types shared by every LeadPulse crate.

use thiserror::Error;

/// The error type for storage, delivery, configuration and ingestion failures.
#[derive(Debug, Error)]
pub enum LeadPulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Delivery channel failure (transport error or non-ok API response).
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LeadPulseError {
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn channel(msg: impl std::fmt::Display) -> Self {
        Self::Channel(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LeadPulseError>;
