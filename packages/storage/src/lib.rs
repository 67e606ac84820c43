// ABOUTME: SQLite persistence for jobs, executions, agents, scripts and credentials
// ABOUTME: Owns the connection pool and runs embedded migrations on connect

mod agents;
mod credentials;
mod executions;
mod jobs;
mod scripts;

pub use executions::TerminalState;

use automa_core::{ErrorKind, ParseEnumError, ValidationError};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Execution {0} already reached a terminal status")]
    AlreadyTerminal(String),

    #[error("Job {0} already has an execution in flight")]
    ExecutionInFlight(String),

    #[error("Job {0} is inactive")]
    JobInactive(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Credential {0} is still assigned to a script")]
    InUse(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Corrupt column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Missing records referenced by a job are configuration problems
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::NotFound { .. } | Self::Validation(_) | Self::JobInactive(_) => {
                Some(ErrorKind::TerminalConfig)
            }
            Self::ExecutionInFlight(_) => Some(ErrorKind::SchedulingConflict),
            _ => None,
        }
    }
}

impl From<ParseEnumError> for StorageError {
    fn from(e: ParseEnumError) -> Self {
        Self::Corrupt {
            column: e.kind,
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Handle to the Automa database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) the database at `url` and apply migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.migrate().await?;
        info!(url, "Connected to database");
        Ok(storage)
    }

    /// Single-connection in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Canonical timestamp encoding; fixed precision keeps string comparison chronological
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            column,
            reason: e.to_string(),
        })
}

pub(crate) fn parse_opt_ts(column: &'static str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(column, &v)).transpose()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_encoding_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(ts(early) < ts(late));
        assert_eq!(parse_ts("t", &ts(late)).unwrap(), late);
    }

    #[test]
    fn test_corrupt_timestamp_is_reported() {
        let err = parse_ts("next_run", "yesterday").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { column: "next_run", .. }));
    }

    #[tokio::test]
    async fn test_connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("automa.db");
        let url = format!("sqlite://{}", path.display());

        let storage = Storage::connect(&url).await.unwrap();
        storage.close().await;

        assert!(path.exists());
    }
}
