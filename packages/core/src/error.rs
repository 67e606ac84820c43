// ABOUTME: Failure taxonomy shared by every Automa component
// ABOUTME: Each crate error maps onto one ErrorKind which is persisted with the execution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Classification of everything that can end a run or reject a schedule.
///
/// The stable `code()` is what gets written to `job_executions.error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad cron expression, missing script or image. Never retried.
    TerminalConfig,
    /// Container API unreachable or resources exhausted, after retries ran out.
    TransientInfra,
    /// Script ran to completion with a non-zero exit code.
    ScriptRuntime,
    /// Script exceeded its wall-clock budget and was torn down.
    Timeout,
    /// Wrong password or tampered ciphertext.
    CredentialAuth,
    /// Credential past its `expires_at`.
    CredentialExpired,
    /// A fire overlapped an execution that was still running.
    SchedulingConflict,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TerminalConfig => "terminal_config",
            Self::TransientInfra => "transient_infra",
            Self::ScriptRuntime => "script_runtime",
            Self::Timeout => "timeout",
            Self::CredentialAuth => "credential_auth",
            Self::CredentialExpired => "credential_expired",
            Self::SchedulingConflict => "scheduling_conflict",
        }
    }

    /// Whether a credential problem caused this failure
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::CredentialAuth | Self::CredentialExpired)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ErrorKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terminal_config" => Ok(Self::TerminalConfig),
            "transient_infra" => Ok(Self::TransientInfra),
            "script_runtime" => Ok(Self::ScriptRuntime),
            "timeout" => Ok(Self::Timeout),
            "credential_auth" => Ok(Self::CredentialAuth),
            "credential_expired" => Ok(Self::CredentialExpired),
            "scheduling_conflict" => Ok(Self::SchedulingConflict),
            _ => Err(ParseEnumError::new("error kind", s)),
        }
    }
}

/// Returned when a persisted enum column holds an unknown value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required for {schedule_type} jobs")]
    MissingScheduleField {
        field: &'static str,
        schedule_type: &'static str,
    },

    #[error("{field} must not be set for {schedule_type} jobs")]
    UnexpectedScheduleField {
        field: &'static str,
        schedule_type: &'static str,
    },

    #[error("interval_seconds must be positive, got {0}")]
    NonPositiveInterval(i64),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Invalid environment variable name: {0:?}")]
    InvalidVariableName(String),
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TerminalConfig
    }
}
