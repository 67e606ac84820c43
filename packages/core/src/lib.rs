// ABOUTME: Core types, error taxonomy, and utilities for Automa
// ABOUTME: Foundational package shared by the scheduler, coordinator, sandbox and vault

pub mod error;
pub mod types;
pub mod utils;

// Re-export main types
pub use types::{
    Agent, AgentStatus, Credential, CredentialType, ExecutionStatus, Job, JobExecution,
    ScheduleType, Script, ScriptCredential,
};

// Re-export error taxonomy
pub use error::{ErrorKind, ParseEnumError, ValidationError};

// Re-export utilities
pub use utils::{generate_id, truncate};
