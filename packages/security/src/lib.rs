// ABOUTME: Credential Vault for Automa
// ABOUTME: Password-derived encryption, typed credential payloads, and masked read paths

pub mod encryption;
pub mod payload;
pub mod service;
pub mod vault;

// Re-export main types for convenience
pub use encryption::{EncryptionError, KdfParams, KeyId};
pub use payload::{
    mask_value, ApiKeySecret, CredentialPayload, DbConnectionSecret, OAuthSecret, PayloadError,
    SshKeySecret, UserPassSecret,
};
pub use service::{CredentialService, NewCredential};
pub use vault::{CredentialSummary, CredentialVault, SealedSecret, VaultError};
