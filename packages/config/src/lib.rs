// ABOUTME: Environment-driven configuration for every Automa component
// ABOUTME: Each section has documented defaults; malformed values name the offending variable

pub mod constants;

use constants::*;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} is out of range: {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/automa.db";
pub const DEFAULT_SANDBOX_IMAGE: &str = "automa-sandbox:latest";
pub const DEFAULT_SANDBOX_USER: &str = "sandbox:sandbox";
pub const DEFAULT_SANDBOX_WORK_DIR: &str = "/app";
pub const DEFAULT_SANDBOX_SCRIPT_FILE: &str = "script.py";
pub const DEFAULT_SANDBOX_COMMAND: &str = "python /app/script.py";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

/// Limits and image settings for sandboxed runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub image: String,
    pub memory_mb: u64,
    /// Fraction of one CPU (0.5 = half a core)
    pub cpu_limit: f64,
    pub pids_limit: i64,
    pub timeout: Duration,
    pub command: Vec<String>,
    pub user: String,
    /// Directory inside the container the script is uploaded to
    pub work_dir: String,
    /// File name the script is written under inside `work_dir`
    pub script_file: String,
    pub network_enabled: bool,
    /// Grace period given to long-running agents on stop before SIGKILL
    pub stop_grace: Duration,
    /// Captured stdout/stderr are truncated to this many bytes each
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_SANDBOX_IMAGE.to_string(),
            memory_mb: 256,
            cpu_limit: 0.5,
            pids_limit: 128,
            timeout: Duration::from_secs(300),
            command: split_command(DEFAULT_SANDBOX_COMMAND),
            user: DEFAULT_SANDBOX_USER.to_string(),
            work_dir: DEFAULT_SANDBOX_WORK_DIR.to_string(),
            script_file: DEFAULT_SANDBOX_SCRIPT_FILE.to_string(),
            network_enabled: false,
            stop_grace: Duration::from_secs(10),
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// How often the active set is reconciled with storage
    pub sync_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            sync_interval: Duration::from_secs(30),
        }
    }
}

/// Argon2id cost parameters for newly sealed credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl VaultConfig {
    /// Upper bounds on accepted cost parameters, also applied to stored key ids
    pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;
    pub const MAX_ITERATIONS: u32 = 16;
    pub const MAX_PARALLELISM: u32 = 64;
}

impl Default for VaultConfig {
    fn default() -> Self {
        // Memory: 64 MB, Iterations: 3, Parallelism: 4
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomaConfig {
    pub database: DatabaseConfig,
    pub sandbox: SandboxConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub vault: VaultConfig,
}

impl AutomaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars { lookup: &lookup };

        let database = DatabaseConfig {
            url: vars.string(AUTOMA_DATABASE_URL, defaults.database.url),
        };

        let sandbox = SandboxConfig {
            image: vars.string(AUTOMA_SANDBOX_IMAGE, defaults.sandbox.image),
            memory_mb: vars.parse(AUTOMA_SANDBOX_MEMORY_MB, defaults.sandbox.memory_mb)?,
            cpu_limit: vars.parse(AUTOMA_SANDBOX_CPU_LIMIT, defaults.sandbox.cpu_limit)?,
            pids_limit: vars.parse(AUTOMA_SANDBOX_PIDS_LIMIT, defaults.sandbox.pids_limit)?,
            timeout: Duration::from_secs(vars.parse(
                AUTOMA_SANDBOX_TIMEOUT_SECS,
                defaults.sandbox.timeout.as_secs(),
            )?),
            command: vars
                .get(AUTOMA_SANDBOX_COMMAND)
                .map(|value| split_command(&value))
                .unwrap_or(defaults.sandbox.command),
            user: vars.string(AUTOMA_SANDBOX_USER, defaults.sandbox.user),
            work_dir: vars.string(AUTOMA_SANDBOX_WORK_DIR, defaults.sandbox.work_dir),
            script_file: vars.string(AUTOMA_SANDBOX_SCRIPT_FILE, defaults.sandbox.script_file),
            network_enabled: vars.parse(
                AUTOMA_SANDBOX_NETWORK_ENABLED,
                defaults.sandbox.network_enabled,
            )?,
            stop_grace: Duration::from_secs(vars.parse(
                AUTOMA_SANDBOX_STOP_GRACE_SECS,
                defaults.sandbox.stop_grace.as_secs(),
            )?),
            max_output_bytes: vars.parse(
                AUTOMA_SANDBOX_MAX_OUTPUT_BYTES,
                defaults.sandbox.max_output_bytes,
            )?,
        };

        let retry = RetryConfig {
            max_attempts: vars.parse(AUTOMA_RETRY_MAX_ATTEMPTS, defaults.retry.max_attempts)?,
            initial_delay: Duration::from_millis(vars.parse(
                AUTOMA_RETRY_INITIAL_DELAY_MS,
                defaults.retry.initial_delay.as_millis() as u64,
            )?),
            backoff_factor: vars.parse(AUTOMA_RETRY_BACKOFF_FACTOR, defaults.retry.backoff_factor)?,
            max_delay: Duration::from_millis(vars.parse(
                AUTOMA_RETRY_MAX_DELAY_MS,
                defaults.retry.max_delay.as_millis() as u64,
            )?),
        };

        let scheduler = SchedulerConfig {
            tick_interval: Duration::from_millis(vars.parse(
                AUTOMA_SCHEDULER_TICK_MS,
                defaults.scheduler.tick_interval.as_millis() as u64,
            )?),
            sync_interval: Duration::from_secs(vars.parse(
                AUTOMA_SCHEDULER_SYNC_SECS,
                defaults.scheduler.sync_interval.as_secs(),
            )?),
        };

        let vault = VaultConfig {
            memory_kib: vars.parse(AUTOMA_VAULT_ARGON2_MEMORY_KIB, defaults.vault.memory_kib)?,
            iterations: vars.parse(AUTOMA_VAULT_ARGON2_ITERATIONS, defaults.vault.iterations)?,
            parallelism: vars.parse(
                AUTOMA_VAULT_ARGON2_PARALLELISM,
                defaults.vault.parallelism,
            )?,
        };

        let config = Self {
            database,
            sandbox,
            retry,
            scheduler,
            vault,
        };
        config.validate()?;
        debug!(image = %config.sandbox.image, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sandbox.memory_mb == 0 {
            return out_of_range(AUTOMA_SANDBOX_MEMORY_MB, "must be greater than 0");
        }
        if self.sandbox.cpu_limit.is_nan() || self.sandbox.cpu_limit <= 0.0 {
            return out_of_range(AUTOMA_SANDBOX_CPU_LIMIT, "must be greater than 0");
        }
        if self.sandbox.timeout.is_zero() {
            return out_of_range(AUTOMA_SANDBOX_TIMEOUT_SECS, "must be greater than 0");
        }
        if self.sandbox.command.is_empty() {
            return out_of_range(AUTOMA_SANDBOX_COMMAND, "must not be empty");
        }
        if self.retry.max_attempts == 0 {
            return out_of_range(AUTOMA_RETRY_MAX_ATTEMPTS, "must be at least 1");
        }
        if self.retry.backoff_factor.is_nan() || self.retry.backoff_factor < 1.0 {
            return out_of_range(AUTOMA_RETRY_BACKOFF_FACTOR, "must be at least 1.0");
        }
        if self.scheduler.tick_interval.is_zero() {
            return out_of_range(AUTOMA_SCHEDULER_TICK_MS, "must be greater than 0");
        }
        if self.scheduler.sync_interval.is_zero() {
            return out_of_range(AUTOMA_SCHEDULER_SYNC_SECS, "must be greater than 0");
        }
        if self.vault.parallelism == 0 || self.vault.iterations == 0 {
            return out_of_range(AUTOMA_VAULT_ARGON2_ITERATIONS, "cost parameters must be non-zero");
        }
        if self.vault.memory_kib > VaultConfig::MAX_MEMORY_KIB {
            return out_of_range(AUTOMA_VAULT_ARGON2_MEMORY_KIB, "must not exceed 1 GiB");
        }
        if self.vault.iterations > VaultConfig::MAX_ITERATIONS {
            return out_of_range(AUTOMA_VAULT_ARGON2_ITERATIONS, "must not exceed 16");
        }
        if self.vault.parallelism > VaultConfig::MAX_PARALLELISM {
            return out_of_range(AUTOMA_VAULT_ARGON2_PARALLELISM, "must not exceed 64");
        }
        Ok(())
    }
}

fn out_of_range(var: &'static str, reason: &str) -> Result<()> {
    Err(ConfigError::OutOfRange {
        var,
        reason: reason.to_string(),
    })
}

fn split_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(String::from).collect()
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, var: &str, default: String) -> String {
        self.get(var).unwrap_or(default)
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue {
                    var,
                    reason: e.to_string(),
                    value,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AutomaConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AutomaConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, AutomaConfig::default());
        assert_eq!(config.sandbox.command, vec!["python", "/app/script.py"]);
        assert!(!config.sandbox.network_enabled);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = from_pairs(&[
            (AUTOMA_SANDBOX_IMAGE, "python:3.12-slim"),
            (AUTOMA_SANDBOX_MEMORY_MB, "512"),
            (AUTOMA_SANDBOX_TIMEOUT_SECS, "30"),
            (AUTOMA_RETRY_INITIAL_DELAY_MS, "250"),
            (AUTOMA_SANDBOX_COMMAND, "node /app/script.js"),
        ])
        .unwrap();
        assert_eq!(config.sandbox.image, "python:3.12-slim");
        assert_eq!(config.sandbox.memory_mb, 512);
        assert_eq!(config.sandbox.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.sandbox.command, vec!["node", "/app/script.js"]);
    }

    #[test]
    fn test_blank_value_falls_back_to_default() {
        let config = from_pairs(&[(AUTOMA_SANDBOX_MEMORY_MB, "  ")]).unwrap();
        assert_eq!(config.sandbox.memory_mb, 256);
    }

    #[test]
    fn test_malformed_value_names_variable() {
        let err = from_pairs(&[(AUTOMA_RETRY_MAX_ATTEMPTS, "three")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { var, value, .. } => {
                assert_eq!(var, AUTOMA_RETRY_MAX_ATTEMPTS);
                assert_eq!(value, "three");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[rstest]
    #[case(AUTOMA_RETRY_MAX_ATTEMPTS, "0")]
    #[case(AUTOMA_RETRY_BACKOFF_FACTOR, "0.5")]
    #[case(AUTOMA_SANDBOX_MEMORY_MB, "0")]
    #[case(AUTOMA_SANDBOX_CPU_LIMIT, "0")]
    #[case(AUTOMA_SANDBOX_TIMEOUT_SECS, "0")]
    #[case(AUTOMA_SCHEDULER_TICK_MS, "0")]
    #[case(AUTOMA_SCHEDULER_SYNC_SECS, "0")]
    #[case(AUTOMA_VAULT_ARGON2_MEMORY_KIB, "4294967295")]
    #[case(AUTOMA_VAULT_ARGON2_PARALLELISM, "65")]
    fn test_out_of_range_names_variable(#[case] var: &'static str, #[case] value: &str) {
        let err = from_pairs(&[(var, value)]).unwrap_err();
        assert!(
            matches!(err, ConfigError::OutOfRange { var: named, .. } if named == var),
            "unexpected error: {err:?}"
        );
    }
}
