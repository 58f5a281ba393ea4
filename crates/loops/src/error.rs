//! Loop subsystem errors.

use crate::cron::CronError;
use cadence_core::error::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    InvalidSchedule(#[from] CronError),

    #[error("Schedule '{0}' never fires")]
    NeverFires(String),

    #[error("Loop not found: {0}")]
    NotFound(String),

    #[error("Loop id must be non-empty and use only ASCII letters, digits, '-', '_' or '.': {0:?}")]
    InvalidId(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact I/O failed at {path}: {reason}")]
    Artifact { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LoopError>;
