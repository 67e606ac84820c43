// ABOUTME: Error type for schedule validation and scheduler persistence
// ABOUTME: Invalid schedules are terminal configuration errors raised at schedule time

use automa_core::{ErrorKind, ValidationError};
use automa_storage::StorageError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job's schedule definition is invalid; rejected at schedule time.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSchedule(_) => ErrorKind::TerminalConfig,
            Self::Storage(e) => e.kind().unwrap_or(ErrorKind::TransientInfra),
        }
    }
}

impl From<ValidationError> for SchedulerError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidSchedule(e.to_string())
    }
}
