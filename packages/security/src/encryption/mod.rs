// ABOUTME: Password-derived credential encryption using Argon2id and ChaCha20-Poly1305
// ABOUTME: Key material lives in zeroizing buffers scoped to a single call
//
// SECURITY MODEL:
//
// - The symmetric key is derived from the owner's live password plus a per-user
//   32-byte salt with Argon2id. It is never cached or persisted.
// - Each ciphertext is sealed with ChaCha20-Poly1305 under a fresh random nonce and
//   stored as base64(nonce || ciphertext || tag).
// - The key id records the derivation parameters and a salt fingerprint so that
//   ciphertexts sealed under older parameters remain decryptable.

use argon2::{Argon2, ParamsBuilder, Version};
use automa_config::VaultConfig;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::{
    aead::{self, Nonce, UnboundKey},
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Nonce size for ChaCha20-Poly1305
const NONCE_SIZE: usize = 12;

/// Derived key length (256-bit)
const KEY_SIZE: usize = 32;

/// Required per-user salt length
pub const SALT_SIZE: usize = 32;

/// Current key-id format version
const KEY_ID_VERSION: &str = "v1";
const KEY_ID_ALGORITHM: &str = "argon2id";

/// Hex characters of SHA-256(salt) kept in the key id
const FINGERPRINT_LEN: usize = 16;

pub type DerivedKey = Zeroizing<[u8; KEY_SIZE]>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Failed to generate random data: {0}")]
    RandomGeneration(String),

    #[error("Failed to encrypt data: {0}")]
    Encryption(String),

    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),

    #[error("Password required for credential encryption")]
    PasswordRequired,

    #[error("Salt must be {SALT_SIZE} bytes")]
    InvalidSalt,

    /// Deliberately carries no detail: wrong key and corrupt data are indistinguishable
    #[error("Decryption failed")]
    Decryption,
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl From<VaultConfig> for KdfParams {
    fn from(config: VaultConfig) -> Self {
        Self {
            memory_kib: config.memory_kib,
            iterations: config.iterations,
            parallelism: config.parallelism,
        }
    }
}

impl KdfParams {
    pub fn within_limits(&self) -> bool {
        (1..=VaultConfig::MAX_MEMORY_KIB).contains(&self.memory_kib)
            && (1..=VaultConfig::MAX_ITERATIONS).contains(&self.iterations)
            && (1..=VaultConfig::MAX_PARALLELISM).contains(&self.parallelism)
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        VaultConfig::default().into()
    }
}

/// Key-version tag stored alongside every ciphertext.
///
/// Rendered as `v1$argon2id$m=65536,t=3,p=4$<salt fingerprint>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyId {
    pub params: KdfParams,
    pub salt_fingerprint: String,
}

impl KeyId {
    pub fn new(params: KdfParams, salt: &[u8]) -> Self {
        Self {
            params,
            salt_fingerprint: salt_fingerprint(salt),
        }
    }

    /// Compare the recorded fingerprint with `salt` without short-circuiting
    pub fn matches_salt(&self, salt: &[u8]) -> bool {
        use subtle::ConstantTimeEq;
        let expected = salt_fingerprint(salt);
        self.salt_fingerprint
            .as_bytes()
            .ct_eq(expected.as_bytes())
            .into()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}${}$m={},t={},p={}${}",
            KEY_ID_VERSION,
            KEY_ID_ALGORITHM,
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            self.salt_fingerprint
        )
    }
}

impl FromStr for KeyId {
    type Err = EncryptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EncryptionError::InvalidKeyId(s.to_string());

        let mut parts = s.split('$');
        let (Some(version), Some(algorithm), Some(params), Some(fingerprint), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };

        if version != KEY_ID_VERSION || algorithm != KEY_ID_ALGORITHM {
            return Err(invalid());
        }
        if fingerprint.len() != FINGERPRINT_LEN
            || !fingerprint.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(invalid());
        }

        let mut memory_kib = None;
        let mut iterations = None;
        let mut parallelism = None;
        for pair in params.split(',') {
            let (name, value) = pair.split_once('=').ok_or_else(invalid)?;
            let value: u32 = value.parse().map_err(|_| invalid())?;
            match name {
                "m" => memory_kib = Some(value),
                "t" => iterations = Some(value),
                "p" => parallelism = Some(value),
                _ => return Err(invalid()),
            }
        }

        let params = KdfParams {
            memory_kib: memory_kib.ok_or_else(invalid)?,
            iterations: iterations.ok_or_else(invalid)?,
            parallelism: parallelism.ok_or_else(invalid)?,
        };
        // Stored tags are untrusted; costs outside the accepted range are never derived
        if !params.within_limits() {
            return Err(invalid());
        }

        Ok(Self {
            params,
            salt_fingerprint: fingerprint.to_string(),
        })
    }
}

fn salt_fingerprint(salt: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(salt));
    digest[..FINGERPRINT_LEN].to_string()
}

/// Validate password and salt parameters
pub fn validate_password_and_salt(password: &str, salt: &[u8]) -> Result<(), EncryptionError> {
    if password.is_empty() {
        return Err(EncryptionError::PasswordRequired);
    }
    if salt.len() != SALT_SIZE {
        return Err(EncryptionError::InvalidSalt);
    }
    Ok(())
}

/// Derive a 256-bit key from `password` and `salt` with Argon2id
pub fn derive_key(password: &str, salt: &[u8], params: KdfParams) -> Result<DerivedKey, EncryptionError> {
    let params = ParamsBuilder::new()
        .m_cost(params.memory_kib)
        .t_cost(params.iterations)
        .p_cost(params.parallelism)
        .output_len(KEY_SIZE)
        .build()
        .map_err(|e| EncryptionError::KeyDerivation(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| EncryptionError::KeyDerivation(format!("Argon2 derivation failed: {}", e)))?;

    Ok(key)
}

/// Generate a random per-user salt
pub fn generate_salt() -> Result<Vec<u8>, EncryptionError> {
    let mut salt = vec![0u8; SALT_SIZE];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| EncryptionError::RandomGeneration("Failed to generate salt".to_string()))?;
    Ok(salt)
}

/// Seal `plaintext` under `key`.
/// Returns base64-encoded: nonce || ciphertext || tag
pub fn seal(key: &DerivedKey, plaintext: &[u8], rng: &SystemRandom) -> Result<String, EncryptionError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| EncryptionError::RandomGeneration("Failed to generate nonce".to_string()))?;

    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let unbound_key = UnboundKey::new(&aead::CHACHA20_POLY1305, &key[..])
        .map_err(|_| EncryptionError::Encryption("Invalid key length".to_string()))?;
    let sealing_key = aead::LessSafeKey::new(unbound_key);

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| EncryptionError::Encryption("Seal operation failed".to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + in_out.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&in_out);

    Ok(BASE64.encode(&result))
}

/// Open a value produced by [`seal`]. Every failure is the same `Decryption` error.
pub fn open(key: &DerivedKey, sealed: &str) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
    let encrypted_data = BASE64
        .decode(sealed)
        .map_err(|_| EncryptionError::Decryption)?;

    if encrypted_data.len() < NONCE_SIZE + aead::CHACHA20_POLY1305.tag_len() {
        return Err(EncryptionError::Decryption);
    }

    let (nonce_bytes, ciphertext_and_tag) = encrypted_data.split_at(NONCE_SIZE);
    let nonce =
        Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| EncryptionError::Decryption)?;

    let unbound_key = UnboundKey::new(&aead::CHACHA20_POLY1305, &key[..])
        .map_err(|_| EncryptionError::Decryption)?;
    let opening_key = aead::LessSafeKey::new(unbound_key);

    let mut in_out = Zeroizing::new(ciphertext_and_tag.to_vec());
    let plaintext_len = opening_key
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| EncryptionError::Decryption)?
        .len();

    in_out.truncate(plaintext_len);
    Ok(in_out)
}
