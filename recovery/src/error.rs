//! Error taxonomy for the recovery crate.

use thiserror::Error;
use wayfarer_core::HandleError;
use wayfarer_core::StoreError;

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Programmer error: a retry action that can never execute. Raised at
    /// enqueue time, never from a recovery path.
    #[error("invalid retry action: {0}")]
    InvalidAction(String),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
