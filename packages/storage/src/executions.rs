// ABOUTME: JobExecution persistence owned by the execution coordinator
// ABOUTME: Terminal fields are written exactly once; a terminal row is immutable

use crate::{is_unique_violation, parse_opt_ts, parse_ts, ts, Result, Storage, StorageError};
use automa_core::{generate_id, ErrorKind, ExecutionStatus, JobExecution};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

const EXECUTION_COLUMNS: &str = "id, job_id, status, started_at, finished_at, exit_code, \
     output, error_log, error_kind, attempts";

/// Everything written when an execution reaches a terminal status
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalState {
    pub status: ExecutionStatus,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i64>,
    pub output: Option<String>,
    pub error_log: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
}

impl Storage {
    /// Insert a `pending` execution row for `job_id`.
    /// Fails with `ExecutionInFlight` while another row of the job is pending or running,
    /// whichever process created it.
    pub async fn create_execution(&self, job_id: &str) -> Result<JobExecution> {
        let execution = JobExecution {
            id: generate_id("exec"),
            job_id: job_id.to_string(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            output: None,
            error_log: None,
            error_kind: None,
            attempts: 0,
        };

        sqlx::query(
            r#"
            INSERT INTO job_executions (id, job_id, status, started_at, attempts)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.job_id)
        .bind(execution.status.as_str())
        .bind(ts(execution.started_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::ExecutionInFlight(job_id.to_string())
            } else {
                e.into()
            }
        })?;

        Ok(execution)
    }

    pub async fn mark_execution_running(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_executions SET status = 'running' WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either missing or already past pending
            let current = self.get_execution(id).await?;
            if current.status.is_terminal() {
                return Err(StorageError::AlreadyTerminal(id.to_string()));
            }
        }
        Ok(())
    }

    /// Write the terminal fields. Fails with `AlreadyTerminal` if they were written before.
    pub async fn finish_execution(&self, id: &str, state: TerminalState) -> Result<JobExecution> {
        if !state.status.is_terminal() {
            return Err(StorageError::Conflict(format!(
                "cannot finish execution {} with non-terminal status {}",
                id, state.status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = ?2, finished_at = ?3, exit_code = ?4, output = ?5,
                error_log = ?6, error_kind = ?7, attempts = ?8
            WHERE id = ?1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .bind(state.status.as_str())
        .bind(ts(state.finished_at))
        .bind(state.exit_code)
        .bind(&state.output)
        .bind(&state.error_log)
        .bind(state.error_kind.map(|k| k.code()))
        .bind(state.attempts as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing row from one that is already terminal
            self.get_execution(id).await?;
            return Err(StorageError::AlreadyTerminal(id.to_string()));
        }

        self.get_execution(id).await
    }

    pub async fn get_execution(&self, id: &str) -> Result<JobExecution> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_execution(&row),
            None => Err(StorageError::not_found("Execution", id)),
        }
    }

    /// Most recent executions of a job, newest first
    pub async fn list_executions(&self, job_id: &str, limit: i64) -> Result<Vec<JobExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE job_id = ?1 \
             ORDER BY started_at DESC LIMIT ?2"
        ))
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_execution).collect()
    }

    /// Fail executions left `pending` or `running` by a process that died mid-run.
    /// Only rows started before `started_before` are touched, so runs still live in
    /// another process survive. Returns how many rows were closed.
    pub async fn fail_interrupted_executions(
        &self,
        now: DateTime<Utc>,
        started_before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'failed', finished_at = ?1, error_kind = ?2,
                error_log = 'transient_infra: execution interrupted by process shutdown'
            WHERE status IN ('pending', 'running') AND started_at < ?3
            "#,
        )
        .bind(ts(now))
        .bind(ErrorKind::TransientInfra.code())
        .bind(ts(started_before))
        .execute(&self.pool)
        .await?;

        let closed = result.rows_affected();
        if closed > 0 {
            warn!(count = closed, "Marked interrupted executions as failed");
        }
        Ok(closed)
    }
}

fn row_to_execution(row: &SqliteRow) -> Result<JobExecution> {
    Ok(JobExecution {
        id: row.get("id"),
        job_id: row.get("job_id"),
        status: row.get::<String, _>("status").parse::<ExecutionStatus>()?,
        started_at: parse_ts("started_at", &row.get::<String, _>("started_at"))?,
        finished_at: parse_opt_ts("finished_at", row.get("finished_at"))?,
        exit_code: row.get("exit_code"),
        output: row.get("output"),
        error_log: row.get("error_log"),
        error_kind: row
            .get::<Option<String>, _>("error_kind")
            .map(|k| k.parse::<ErrorKind>())
            .transpose()?,
        attempts: row.get::<i64, _>("attempts") as u32,
    })
}
