// ABOUTME: Domain records for jobs, executions, agents, scripts and credentials
// ABOUTME: Status enums carry their persisted string form via as_str/FromStr

use crate::error::{ErrorKind, ParseEnumError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ParseEnumError::new($label, s)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Once,
    Interval,
    Cron,
}

string_enum!(ScheduleType, "schedule type", {
    Once => "once",
    Interval => "interval",
    Cron => "cron",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

string_enum!(ExecutionStatus, "execution status", {
    Pending => "pending",
    Running => "running",
    Success => "success",
    Failed => "failed",
    Timeout => "timeout",
});

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Stopped,
    Running,
    Error,
}

string_enum!(AgentStatus, "agent status", {
    Stopped => "stopped",
    Running => "running",
    Error => "error",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    ApiKey,
    UserPass,
    #[serde(rename = "oauth")]
    OAuth,
    SshKey,
    DbConnection,
    Custom,
}

string_enum!(CredentialType, "credential type", {
    ApiKey => "api_key",
    UserPass => "user_pass",
    OAuth => "oauth",
    SshKey => "ssh_key",
    DbConnection => "db_connection",
    Custom => "custom",
});

/// A schedule definition bound to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub agent_id: String,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    /// For `once` jobs this is the caller-supplied fire time; `None` means immediately.
    pub next_run: Option<DateTime<Utc>>,
    /// Scheduled time of the most recent fire (not its completion time)
    pub last_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Check that exactly one of `cron_expression` / `interval_seconds` is set,
    /// consistent with `schedule_type`.
    pub fn validate_schedule(&self) -> Result<(), ValidationError> {
        let has_cron = self.cron_expression.is_some();
        let has_interval = self.interval_seconds.is_some();

        match self.schedule_type {
            ScheduleType::Cron => {
                if !has_cron {
                    return Err(ValidationError::MissingScheduleField {
                        field: "cron_expression",
                        schedule_type: "cron",
                    });
                }
                if has_interval {
                    return Err(ValidationError::UnexpectedScheduleField {
                        field: "interval_seconds",
                        schedule_type: "cron",
                    });
                }
            }
            ScheduleType::Interval => {
                let Some(seconds) = self.interval_seconds else {
                    return Err(ValidationError::MissingScheduleField {
                        field: "interval_seconds",
                        schedule_type: "interval",
                    });
                };
                if has_cron {
                    return Err(ValidationError::UnexpectedScheduleField {
                        field: "cron_expression",
                        schedule_type: "interval",
                    });
                }
                if seconds <= 0 {
                    return Err(ValidationError::NonPositiveInterval(seconds));
                }
            }
            ScheduleType::Once => {
                if has_cron {
                    return Err(ValidationError::UnexpectedScheduleField {
                        field: "cron_expression",
                        schedule_type: "once",
                    });
                }
                if has_interval {
                    return Err(ValidationError::UnexpectedScheduleField {
                        field: "interval_seconds",
                        schedule_type: "once",
                    });
                }
            }
        }
        Ok(())
    }
}

/// One concrete run of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: String,
    pub job_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub output: Option<String>,
    pub error_log: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Infrastructure attempts the sandbox needed (0 when no container was requested)
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub script_id: Option<String>,
    pub status: AgentStatus,
    /// Live sandbox handle while a long-running agent is up
    pub container_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored credential. `encrypted_data` is only ever ciphertext.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub credential_type: CredentialType,
    pub encrypted_data: String,
    pub encryption_key_id: String,
    pub tags: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("credential_type", &self.credential_type)
            .field("encrypted_data", &"<redacted>")
            .field("encryption_key_id", &self.encryption_key_id)
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Binds a credential to a script under an environment variable name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptCredential {
    pub id: String,
    pub script_id: String,
    pub credential_id: String,
    pub variable_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
