// ABOUTME: Script persistence
// ABOUTME: Scripts are read-only input to the sandbox once stored

use crate::{parse_ts, ts, Result, Storage, StorageError};
use automa_core::{generate_id, Script, ValidationError};
use sqlx::Row;

impl Storage {
    pub async fn create_script(&self, mut script: Script) -> Result<Script> {
        if script.content.trim().is_empty() {
            return Err(ValidationError::Empty("script content").into());
        }
        if script.id.is_empty() {
            script.id = generate_id("script");
        }

        sqlx::query(
            r#"
            INSERT INTO scripts (id, name, description, content, created_by, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&script.id)
        .bind(&script.name)
        .bind(&script.description)
        .bind(&script.content)
        .bind(&script.created_by)
        .bind(ts(script.created_at))
        .bind(ts(script.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(script)
    }

    pub async fn get_script(&self, id: &str) -> Result<Script> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, content, created_by, created_at, updated_at
            FROM scripts
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("Script", id))?;

        Ok(Script {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            content: row.get("content"),
            created_by: row.get("created_by"),
            created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
            updated_at: parse_ts("updated_at", &row.get::<String, _>("updated_at"))?,
        })
    }
}
