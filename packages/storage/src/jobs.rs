// ABOUTME: Job persistence: creation, lookup and scheduler-owned fields
// ABOUTME: next_run, last_run and is_active are written by the scheduler only

use crate::{parse_opt_ts, parse_ts, ts, Result, Storage, StorageError};
use automa_core::{generate_id, Job, ScheduleType};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const JOB_COLUMNS: &str = "id, name, agent_id, schedule_type, cron_expression, interval_seconds, \
     next_run, last_run, is_active, created_by, created_at, updated_at";

impl Storage {
    pub async fn create_job(&self, mut job: Job) -> Result<Job> {
        job.validate_schedule()?;
        if job.id.is_empty() {
            job.id = generate_id("job");
        }

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, agent_id, schedule_type, cron_expression, interval_seconds,
                next_run, last_run, is_active, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.agent_id)
        .bind(job.schedule_type.as_str())
        .bind(&job.cron_expression)
        .bind(job.interval_seconds)
        .bind(job.next_run.map(ts))
        .bind(job.last_run.map(ts))
        .bind(job.is_active)
        .bind(&job.created_by)
        .bind(ts(job.created_at))
        .bind(ts(job.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(StorageError::not_found("Job", id)),
        }
    }

    pub async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE is_active = 1 ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Persist the scheduler's view of a job after it computed or consumed a fire.
    /// Only active jobs are written; a deactivated job fails with `JobInactive` and
    /// stays deactivated.
    pub async fn update_job_schedule(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
        last_run: Option<DateTime<Utc>>,
        is_active: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET next_run = ?2, last_run = ?3, is_active = ?4, updated_at = ?5
            WHERE id = ?1 AND is_active = 1
            "#,
        )
        .bind(id)
        .bind(next_run.map(ts))
        .bind(last_run.map(ts))
        .bind(is_active)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Missing surfaces as NotFound from the lookup
            self.get_job(id).await?;
            return Err(StorageError::JobInactive(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_job_active(&self, id: &str, is_active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(is_active)
            .bind(ts(Utc::now()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Job", id));
        }
        Ok(())
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Job", id));
        }
        Ok(())
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    Ok(Job {
        id: row.get("id"),
        name: row.get("name"),
        agent_id: row.get("agent_id"),
        schedule_type: row.get::<String, _>("schedule_type").parse::<ScheduleType>()?,
        cron_expression: row.get("cron_expression"),
        interval_seconds: row.get("interval_seconds"),
        next_run: parse_opt_ts("next_run", row.get("next_run"))?,
        last_run: parse_opt_ts("last_run", row.get("last_run"))?,
        is_active: row.get("is_active"),
        created_by: row.get("created_by"),
        created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
        updated_at: parse_ts("updated_at", &row.get::<String, _>("updated_at"))?,
    })
}
