// ABOUTME: Agent persistence including the live container handle of long-running agents
// ABOUTME: Status transitions are written by the agent supervisor

use crate::{parse_ts, ts, Result, Storage, StorageError};
use automa_core::{generate_id, Agent, AgentStatus};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const AGENT_COLUMNS: &str =
    "id, name, description, script_id, status, container_id, created_by, created_at, updated_at";

impl Storage {
    pub async fn create_agent(&self, mut agent: Agent) -> Result<Agent> {
        if agent.id.is_empty() {
            agent.id = generate_id("agent");
        }

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, description, script_id, status, container_id,
                created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(&agent.script_id)
        .bind(agent.status.as_str())
        .bind(&agent.container_id)
        .bind(&agent.created_by)
        .bind(ts(agent.created_at))
        .bind(ts(agent.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(agent)
    }

    pub async fn get_agent(&self, id: &str) -> Result<Agent> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_agent(&row),
            None => Err(StorageError::not_found("Agent", id)),
        }
    }

    pub async fn list_agents_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE status = ?1 ORDER BY created_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_agent).collect()
    }

    pub async fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        container_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET status = ?2, container_id = ?3, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(container_id)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Agent", id));
        }
        Ok(())
    }
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
    Ok(Agent {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        script_id: row.get("script_id"),
        status: row.get::<String, _>("status").parse::<AgentStatus>()?,
        container_id: row.get("container_id"),
        created_by: row.get("created_by"),
        created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
        updated_at: parse_ts("updated_at", &row.get::<String, _>("updated_at"))?,
    })
}
