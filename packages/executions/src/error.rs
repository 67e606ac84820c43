// ABOUTME: Error type for the Execution Coordinator and agent supervisor
// ABOUTME: Every variant maps onto the shared ErrorKind taxonomy

use automa_core::ErrorKind;
use automa_sandbox::SandboxError;
use automa_security::VaultError;
use automa_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Job {0} already has an execution in flight")]
    SchedulingConflict(String),

    #[error("Agent {0} is busy with another start or stop")]
    AgentBusy(String),

    #[error("Agent {0} has no script")]
    MissingScript(String),

    #[error("No vault password available for {0}")]
    PasswordUnavailable(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchedulingConflict(_) | Self::AgentBusy(_) => ErrorKind::SchedulingConflict,
            Self::MissingScript(_) => ErrorKind::TerminalConfig,
            Self::PasswordUnavailable(_) => ErrorKind::CredentialAuth,
            Self::Storage(e) => e.kind().unwrap_or(ErrorKind::TransientInfra),
            Self::Vault(e) => e.kind(),
            Self::Sandbox(e) => e.kind(),
        }
    }
}
