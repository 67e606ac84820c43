// ABOUTME: Credential Vault: seals typed payloads and opens stored credentials
// ABOUTME: Expiry is checked before key derivation; every other failure is one generic error

use crate::encryption::{self, EncryptionError, KdfParams, KeyId, SALT_SIZE};
use crate::payload::{CredentialPayload, PayloadError};
use automa_core::{Credential, CredentialType, ErrorKind};
use chrono::{DateTime, Utc};
use ring::rand::SystemRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const DUMMY_SALT: [u8; SALT_SIZE] = [0u8; SALT_SIZE];

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid credential payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    #[error("Credential has expired")]
    Expired,

    #[error("Credential is inactive")]
    Inactive,

    /// Wrong password, foreign salt, or corrupted ciphertext. Never more specific.
    #[error("Credential authentication failed")]
    AuthenticationFailed,

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Storage(#[from] automa_storage::StorageError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Expired => ErrorKind::CredentialExpired,
            Self::Storage(e) => e.kind().unwrap_or(ErrorKind::CredentialAuth),
            Self::InvalidPayload(_) => ErrorKind::TerminalConfig,
            _ => ErrorKind::CredentialAuth,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Output of sealing: what gets stored in `encrypted_data` / `encryption_key_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: String,
    pub key_id: String,
}

/// Derives per-call keys from the owner's password and seals or opens payloads.
/// Holds no key material between calls.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    params: KdfParams,
    rng: Arc<SystemRandom>,
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}

impl CredentialVault {
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            rng: Arc::new(SystemRandom::new()),
        }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Validate and seal `payload` under a key derived from `password` and `salt`
    pub fn encrypt(
        &self,
        payload: &CredentialPayload,
        password: &str,
        salt: &[u8],
    ) -> Result<SealedSecret> {
        payload.validate()?;
        encryption::validate_password_and_salt(password, salt)?;

        let key = encryption::derive_key(password, salt, self.params)?;
        let plaintext = payload.to_bytes()?;
        let ciphertext = encryption::seal(&key, &plaintext, &self.rng)?;

        Ok(SealedSecret {
            ciphertext,
            key_id: KeyId::new(self.params, salt).to_string(),
        })
    }

    /// Open a stored credential with the owner's live password.
    ///
    /// Inactive and expired credentials are rejected before any key derivation.
    /// Past that point the key is always derived, and wrong password, salt
    /// mismatch and corrupt data all surface as `AuthenticationFailed`.
    pub fn decrypt(
        &self,
        credential: &Credential,
        password: &str,
        salt: &[u8],
        now: DateTime<Utc>,
    ) -> Result<CredentialPayload> {
        if !credential.is_active {
            return Err(VaultError::Inactive);
        }
        if credential.is_expired(now) {
            return Err(VaultError::Expired);
        }

        let key_id = credential.encryption_key_id.parse::<KeyId>().ok();
        // Unparseable tags and unusable salts still pay for a full derivation
        let params = key_id.as_ref().map(|k| k.params).unwrap_or(self.params);
        let salt_usable = salt.len() == SALT_SIZE;
        let derivation_salt = if salt_usable { salt } else { &DUMMY_SALT[..] };
        let derived = encryption::derive_key(password, derivation_salt, params);

        let salt_ok = salt_usable && key_id.as_ref().is_some_and(|k| k.matches_salt(salt));
        let opened = derived
            .ok()
            .and_then(|key| encryption::open(&key, &credential.encrypted_data).ok());
        let payload = opened.and_then(|plaintext| {
            CredentialPayload::from_bytes(credential.credential_type, &plaintext).ok()
        });

        match payload {
            Some(payload) if salt_ok => {
                debug!(credential_id = %credential.id, "Credential decrypted");
                Ok(payload)
            }
            _ => {
                debug!(credential_id = %credential.id, "Credential decrypt rejected");
                Err(VaultError::AuthenticationFailed)
            }
        }
    }

    /// Re-encrypt a credential under a new password. Never invoked implicitly.
    pub fn reseal(
        &self,
        credential: &Credential,
        old_password: &str,
        new_password: &str,
        salt: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SealedSecret> {
        let payload = self.decrypt(credential, old_password, salt, now)?;
        self.encrypt(&payload, new_password, salt)
    }
}

/// Credential metadata safe to return from any read path.
/// Has no field that can carry plaintext or ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub credential_type: CredentialType,
    pub tags: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl CredentialSummary {
    pub fn from_credential(credential: &Credential, now: DateTime<Utc>) -> Self {
        Self {
            id: credential.id.clone(),
            name: credential.name.clone(),
            description: credential.description.clone(),
            credential_type: credential.credential_type,
            tags: credential.tags.clone(),
            expires_at: credential.expires_at,
            is_expired: credential.is_expired(now),
            is_active: credential.is_active,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
            last_used_at: credential.last_used_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::generate_salt;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const FAST: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };

    fn payload() -> CredentialPayload {
        CredentialPayload::from_value(
            CredentialType::ApiKey,
            json!({"api_key": "sk-live-0123456789"}),
        )
        .unwrap()
    }

    fn stored(sealed: &SealedSecret, expires_at: Option<DateTime<Utc>>) -> Credential {
        let now = Utc::now();
        Credential {
            id: "cred_test".to_string(),
            name: "stripe".to_string(),
            description: None,
            credential_type: CredentialType::ApiKey,
            encrypted_data: sealed.ciphertext.clone(),
            encryption_key_id: sealed.key_id.clone(),
            tags: vec!["billing".to_string()],
            expires_at,
            is_active: true,
            created_by: "user_1".to_string(),
            created_at: now,
            updated_at: now,
            last_used_at: None,
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "pw", &salt).unwrap();
        assert!(!sealed.ciphertext.contains("sk-live"));

        let opened = vault
            .decrypt(&stored(&sealed, None), "pw", &salt, Utc::now())
            .unwrap();
        assert_eq!(opened, payload());
    }

    #[test]
    fn test_wrong_password_reveals_nothing() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "pw", &salt).unwrap();

        let err = vault
            .decrypt(&stored(&sealed, None), "wrong", &salt, Utc::now())
            .unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailed));
        assert_eq!(err.kind(), ErrorKind::CredentialAuth);
        assert!(!err.to_string().contains("sk-live"));
        assert!(!format!("{:?}", err).contains("sk-live"));
    }

    #[test]
    fn test_tampered_ciphertext_matches_wrong_password_error() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "pw", &salt).unwrap();
        let mut credential = stored(&sealed, None);
        credential.encrypted_data.replace_range(0..4, "AAAA");

        let tampered = vault
            .decrypt(&credential, "pw", &salt, Utc::now())
            .unwrap_err();
        let wrong = vault
            .decrypt(&stored(&sealed, None), "nope", &salt, Utc::now())
            .unwrap_err();
        assert_eq!(tampered.to_string(), wrong.to_string());
    }

    #[test]
    fn test_foreign_salt_is_rejected() {
        let vault = CredentialVault::new(FAST);
        let sealed = vault.encrypt(&payload(), "pw", &[1u8; SALT_SIZE]).unwrap();

        let err = vault
            .decrypt(&stored(&sealed, None), "pw", &[2u8; SALT_SIZE], Utc::now())
            .unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailed));
    }

    #[test]
    fn test_expired_credential_fails_even_with_correct_password() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "pw", &salt).unwrap();
        let now = Utc::now();

        let err = vault
            .decrypt(&stored(&sealed, Some(now - Duration::minutes(1))), "pw", &salt, now)
            .unwrap_err();
        assert!(matches!(err, VaultError::Expired));
        assert_eq!(err.kind(), ErrorKind::CredentialExpired);
    }

    #[test]
    fn test_expiry_checked_before_key_id() {
        // A garbage key id would otherwise fail authentication
        let vault = CredentialVault::new(FAST);
        let now = Utc::now();
        let mut credential = stored(
            &SealedSecret {
                ciphertext: "garbage".to_string(),
                key_id: "garbage".to_string(),
            },
            Some(now),
        );
        credential.expires_at = Some(now);

        let err = vault.decrypt(&credential, "pw", &[0u8; SALT_SIZE], now).unwrap_err();
        assert!(matches!(err, VaultError::Expired));
    }

    #[test]
    fn test_old_parameters_still_decrypt() {
        let old = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = old.encrypt(&payload(), "pw", &salt).unwrap();

        let upgraded = CredentialVault::new(KdfParams {
            memory_kib: 128,
            iterations: 2,
            parallelism: 1,
        });
        let opened = upgraded
            .decrypt(&stored(&sealed, None), "pw", &salt, Utc::now())
            .unwrap();
        assert_eq!(opened, payload());
    }

    #[test]
    fn test_oversized_key_id_costs_fail_authentication() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "pw", &salt).unwrap();
        let fingerprint = sealed.key_id.rsplit('$').next().unwrap().to_string();
        let mut credential = stored(&sealed, None);
        credential.encryption_key_id = format!("v1$argon2id$m=4294967295,t=1,p=1${fingerprint}");

        let err = vault.decrypt(&credential, "pw", &salt, Utc::now()).unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailed));
        assert_eq!(err.kind(), ErrorKind::CredentialAuth);
    }

    #[test]
    fn test_missing_or_short_salt_fails_like_wrong_password() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "pw", &salt).unwrap();
        let credential = stored(&sealed, None);

        for bad_salt in [&[][..], &salt[..16]] {
            let err = vault.decrypt(&credential, "pw", bad_salt, Utc::now()).unwrap_err();
            assert!(matches!(err, VaultError::AuthenticationFailed));
        }
    }

    #[test]
    fn test_invalid_payload_rejected_before_sealing() {
        let vault = CredentialVault::new(FAST);
        let bad = CredentialPayload::Custom(serde_json::Map::new());
        let err = vault.encrypt(&bad, "pw", &[0u8; SALT_SIZE]).unwrap_err();
        assert!(matches!(err, VaultError::InvalidPayload(_)));
    }

    #[test]
    fn test_reseal_under_new_password() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "old", &salt).unwrap();
        let now = Utc::now();

        let resealed = vault
            .reseal(&stored(&sealed, None), "old", "new", &salt, now)
            .unwrap();
        let credential = stored(&resealed, None);
        assert!(vault.decrypt(&credential, "old", &salt, now).is_err());
        assert_eq!(vault.decrypt(&credential, "new", &salt, now).unwrap(), payload());
    }

    #[test]
    fn test_summary_has_no_secret_material() {
        let vault = CredentialVault::new(FAST);
        let salt = generate_salt().unwrap();
        let sealed = vault.encrypt(&payload(), "pw", &salt).unwrap();
        let credential = stored(&sealed, None);

        let summary = CredentialSummary::from_credential(&credential, Utc::now());
        let rendered = serde_json::to_string(&summary).unwrap();
        assert!(!rendered.contains(&sealed.ciphertext));
        assert!(!rendered.contains("sk-live"));
        assert!(rendered.contains("stripe"));
        assert!(!summary.is_expired);
    }
}
