// ABOUTME: Credential, script-credential binding and vault salt persistence
// ABOUTME: Only ciphertext is ever stored; plaintext never reaches this layer

use crate::{is_unique_violation, parse_opt_ts, parse_ts, ts, Result, Storage, StorageError};
use automa_core::{generate_id, Credential, CredentialType, ScriptCredential, ValidationError};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const CREDENTIAL_COLUMNS: &str = "id, name, description, credential_type, encrypted_data, \
     encryption_key_id, tags, expires_at, is_active, created_by, created_at, updated_at, last_used_at";

impl Storage {
    pub async fn create_credential(&self, mut credential: Credential) -> Result<Credential> {
        if credential.id.is_empty() {
            credential.id = generate_id("cred");
        }
        let tags = serde_json::to_string(&credential.tags)?;

        sqlx::query(
            r#"
            INSERT INTO credentials (
                id, name, description, credential_type, encrypted_data, encryption_key_id,
                tags, expires_at, is_active, created_by, created_at, updated_at, last_used_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.name)
        .bind(&credential.description)
        .bind(credential.credential_type.as_str())
        .bind(&credential.encrypted_data)
        .bind(&credential.encryption_key_id)
        .bind(&tags)
        .bind(credential.expires_at.map(ts))
        .bind(credential.is_active)
        .bind(&credential.created_by)
        .bind(ts(credential.created_at))
        .bind(ts(credential.updated_at))
        .bind(credential.last_used_at.map(ts))
        .execute(&self.pool)
        .await?;

        Ok(credential)
    }

    pub async fn get_credential(&self, id: &str) -> Result<Credential> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_credential(&row),
            None => Err(StorageError::not_found("Credential", id)),
        }
    }

    pub async fn list_credentials(&self, owner: &str) -> Result<Vec<Credential>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE created_by = ?1 ORDER BY name"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_credential).collect()
    }

    /// Replace ciphertext and key tag, e.g. after an explicit re-seal under a new password
    pub async fn update_credential_secret(
        &self,
        id: &str,
        encrypted_data: &str,
        encryption_key_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET encrypted_data = ?2, encryption_key_id = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(encrypted_data)
        .bind(encryption_key_id)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Credential", id));
        }
        Ok(())
    }

    pub async fn touch_credential_used(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE credentials SET last_used_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(ts(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a credential. Refused while any script still references it.
    pub async fn delete_credential(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let assigned: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM script_credentials WHERE credential_id = ?1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if assigned > 0 {
            return Err(StorageError::InUse(id.to_string()));
        }

        let result = sqlx::query("DELETE FROM credentials WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Credential", id));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Bind a credential to a script under `variable_name`
    pub async fn assign_credential(
        &self,
        script_id: &str,
        credential_id: &str,
        variable_name: &str,
    ) -> Result<ScriptCredential> {
        if !is_valid_env_name(variable_name) {
            return Err(ValidationError::InvalidVariableName(variable_name.to_string()).into());
        }

        let binding = ScriptCredential {
            id: generate_id("sc"),
            script_id: script_id.to_string(),
            credential_id: credential_id.to_string(),
            variable_name: variable_name.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO script_credentials (id, script_id, credential_id, variable_name, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5)
            "#,
        )
        .bind(&binding.id)
        .bind(&binding.script_id)
        .bind(&binding.credential_id)
        .bind(&binding.variable_name)
        .bind(ts(binding.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict(format!(
                    "script {} already binds credential {} or variable {}",
                    script_id, credential_id, variable_name
                ))
            } else {
                e.into()
            }
        })?;

        Ok(binding)
    }

    pub async fn list_active_script_credentials(
        &self,
        script_id: &str,
    ) -> Result<Vec<ScriptCredential>> {
        let rows = sqlx::query(
            r#"
            SELECT id, script_id, credential_id, variable_name, is_active, created_at
            FROM script_credentials
            WHERE script_id = ?1 AND is_active = 1
            ORDER BY variable_name
            "#,
        )
        .bind(script_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ScriptCredential {
                    id: row.get("id"),
                    script_id: row.get("script_id"),
                    credential_id: row.get("credential_id"),
                    variable_name: row.get("variable_name"),
                    is_active: row.get("is_active"),
                    created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    pub async fn remove_script_credential(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM script_credentials WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("ScriptCredential", id));
        }
        Ok(())
    }

    pub async fn vault_salt(&self, user_id: &str) -> Result<Option<Vec<u8>>> {
        let salt = sqlx::query_scalar("SELECT salt FROM vault_salts WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(salt)
    }

    /// Store `candidate` as the user's salt unless one exists; returns the stored salt
    pub async fn ensure_vault_salt(&self, user_id: &str, candidate: &[u8]) -> Result<Vec<u8>> {
        sqlx::query(
            "INSERT OR IGNORE INTO vault_salts (user_id, salt, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(user_id)
        .bind(candidate)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.vault_salt(user_id)
            .await?
            .ok_or_else(|| StorageError::not_found("VaultSalt", user_id))
    }
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn row_to_credential(row: &SqliteRow) -> Result<Credential> {
    let tags: Vec<String> = serde_json::from_str(&row.get::<String, _>("tags"))?;
    Ok(Credential {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        credential_type: row
            .get::<String, _>("credential_type")
            .parse::<CredentialType>()?,
        encrypted_data: row.get("encrypted_data"),
        encryption_key_id: row.get("encryption_key_id"),
        tags,
        expires_at: parse_opt_ts("expires_at", row.get("expires_at"))?,
        is_active: row.get("is_active"),
        created_by: row.get("created_by"),
        created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
        updated_at: parse_ts("updated_at", &row.get::<String, _>("updated_at"))?,
        last_used_at: parse_opt_ts("last_used_at", row.get("last_used_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::is_valid_env_name;

    #[test]
    fn test_env_name_validation() {
        assert!(is_valid_env_name("GITHUB_TOKEN"));
        assert!(is_valid_env_name("_private"));
        assert!(!is_valid_env_name(""));
        assert!(!is_valid_env_name("1TOKEN"));
        assert!(!is_valid_env_name("MY-TOKEN"));
    }
}
