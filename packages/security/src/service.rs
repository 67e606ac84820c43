// ABOUTME: Storage-backed credential operations for owners and the execution coordinator
// ABOUTME: Resolves per-user salts and runs key derivation off the async executor

use crate::encryption;
use crate::payload::CredentialPayload;
use crate::vault::{CredentialSummary, CredentialVault, Result, VaultError};
use automa_core::Credential;
use automa_storage::Storage;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Input for storing a new credential
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub payload: CredentialPayload,
    pub tags: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CredentialService {
    storage: Storage,
    vault: CredentialVault,
}

impl CredentialService {
    pub fn new(storage: Storage, vault: CredentialVault) -> Self {
        Self { storage, vault }
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// The owner's salt, created on first use
    async fn salt_for(&self, owner: &str) -> Result<Vec<u8>> {
        if let Some(salt) = self.storage.vault_salt(owner).await? {
            return Ok(salt);
        }
        let candidate = encryption::generate_salt()?;
        Ok(self.storage.ensure_vault_salt(owner, &candidate).await?)
    }

    /// Seal and persist a credential; returns its masked summary
    pub async fn create(&self, input: NewCredential, password: &str) -> Result<CredentialSummary> {
        let salt = self.salt_for(&input.owner).await?;
        let vault = self.vault.clone();
        let payload = input.payload.clone();
        let password = Zeroizing::new(password.to_string());

        let sealed = tokio::task::spawn_blocking(move || vault.encrypt(&payload, &password, &salt))
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??;

        let now = Utc::now();
        let credential = self
            .storage
            .create_credential(Credential {
                id: String::new(),
                name: input.name,
                description: input.description,
                credential_type: input.payload.credential_type(),
                encrypted_data: sealed.ciphertext,
                encryption_key_id: sealed.key_id,
                tags: input.tags,
                expires_at: input.expires_at,
                is_active: true,
                created_by: input.owner,
                created_at: now,
                updated_at: now,
                last_used_at: None,
            })
            .await?;

        info!(credential_id = %credential.id, credential_type = %credential.credential_type, "Credential stored");
        Ok(CredentialSummary::from_credential(&credential, now))
    }

    /// Masked metadata for every credential the owner has
    pub async fn list(&self, owner: &str) -> Result<Vec<CredentialSummary>> {
        let now = Utc::now();
        Ok(self
            .storage
            .list_credentials(owner)
            .await?
            .iter()
            .map(|c| CredentialSummary::from_credential(c, now))
            .collect())
    }

    /// Decrypt a stored credential for its owner and record the use
    pub async fn decrypt(
        &self,
        credential_id: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialPayload> {
        let credential = self.storage.get_credential(credential_id).await?;
        // A user without a salt never sealed anything; the vault derives under a stand-in salt and fails
        let salt = self
            .storage
            .vault_salt(&credential.created_by)
            .await?
            .unwrap_or_default();

        let vault = self.vault.clone();
        let password = Zeroizing::new(password.to_string());
        let opened = {
            let credential = credential.clone();
            tokio::task::spawn_blocking(move || vault.decrypt(&credential, &password, &salt, now))
                .await
                .map_err(|e| VaultError::Task(e.to_string()))?
        };

        match opened {
            Ok(payload) => {
                if let Err(e) = self.storage.touch_credential_used(&credential.id, now).await {
                    warn!(credential_id = %credential.id, error = %e, "Failed to record credential use");
                }
                Ok(payload)
            }
            Err(e) => {
                warn!(credential_id = %credential.id, error_kind = %e.kind(), "Credential decrypt failed");
                Err(e)
            }
        }
    }

    /// Explicitly re-encrypt one credential under a new password
    pub async fn reseal(
        &self,
        credential_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let credential = self.storage.get_credential(credential_id).await?;
        let salt = self
            .storage
            .vault_salt(&credential.created_by)
            .await?
            .unwrap_or_default();

        let vault = self.vault.clone();
        let old = Zeroizing::new(old_password.to_string());
        let new = Zeroizing::new(new_password.to_string());
        let sealed = {
            let credential = credential.clone();
            tokio::task::spawn_blocking(move || {
                vault.reseal(&credential, &old, &new, &salt, Utc::now())
            })
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??
        };

        self.storage
            .update_credential_secret(&credential.id, &sealed.ciphertext, &sealed.key_id)
            .await?;
        info!(credential_id = %credential.id, "Credential resealed");
        Ok(())
    }
}
