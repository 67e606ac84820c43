// ABOUTME: Typed credential payloads with per-type required fields
// ABOUTME: Validation before sealing, environment value selection, and display masking

use automa_core::CredentialType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPassSecret {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthSecret {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeySecret {
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConnectionSecret {
    pub connection_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Decrypted credential material, one variant per credential type
#[derive(Clone, PartialEq)]
pub enum CredentialPayload {
    ApiKey(ApiKeySecret),
    UserPass(UserPassSecret),
    OAuth(OAuthSecret),
    SshKey(SshKeySecret),
    DbConnection(DbConnectionSecret),
    Custom(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("{credential_type} credential requires a non-empty {field}")]
    MissingField {
        credential_type: CredentialType,
        field: &'static str,
    },

    #[error("custom credential must contain at least one field")]
    EmptyCustom,

    #[error("payload does not match the {0} schema")]
    Schema(CredentialType),
}

impl CredentialPayload {
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::ApiKey(_) => CredentialType::ApiKey,
            Self::UserPass(_) => CredentialType::UserPass,
            Self::OAuth(_) => CredentialType::OAuth,
            Self::SshKey(_) => CredentialType::SshKey,
            Self::DbConnection(_) => CredentialType::DbConnection,
            Self::Custom(_) => CredentialType::Custom,
        }
    }

    /// Check required fields for the variant. Runs before anything is sealed.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let credential_type = self.credential_type();
        let required: Vec<(&'static str, &str)> = match self {
            Self::ApiKey(s) => vec![("api_key", s.api_key.as_str())],
            Self::UserPass(s) => vec![
                ("username", s.username.as_str()),
                ("password", s.password.as_str()),
            ],
            Self::OAuth(s) => vec![("access_token", s.access_token.as_str())],
            Self::SshKey(s) => vec![("private_key", s.private_key.as_str())],
            Self::DbConnection(s) => vec![("connection_string", s.connection_string.as_str())],
            Self::Custom(map) => {
                if map.is_empty() {
                    return Err(PayloadError::EmptyCustom);
                }
                Vec::new()
            }
        };

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PayloadError::MissingField {
                    credential_type,
                    field,
                });
            }
        }
        Ok(())
    }

    /// Parse a user-supplied JSON object into the variant for `credential_type`
    pub fn from_value(credential_type: CredentialType, value: Value) -> Result<Self, PayloadError> {
        let schema = || PayloadError::Schema(credential_type);
        let payload = match credential_type {
            CredentialType::ApiKey => Self::ApiKey(serde_json::from_value(value).map_err(|_| schema())?),
            CredentialType::UserPass => {
                Self::UserPass(serde_json::from_value(value).map_err(|_| schema())?)
            }
            CredentialType::OAuth => Self::OAuth(serde_json::from_value(value).map_err(|_| schema())?),
            CredentialType::SshKey => Self::SshKey(serde_json::from_value(value).map_err(|_| schema())?),
            CredentialType::DbConnection => {
                Self::DbConnection(serde_json::from_value(value).map_err(|_| schema())?)
            }
            CredentialType::Custom => match value {
                Value::Object(map) => Self::Custom(map),
                _ => return Err(schema()),
            },
        };
        payload.validate()?;
        Ok(payload)
    }

    /// Plaintext bytes that get sealed. The type tag lives outside the ciphertext.
    pub(crate) fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, PayloadError> {
        let schema = || PayloadError::Schema(self.credential_type());
        let bytes = match self {
            Self::ApiKey(s) => serde_json::to_vec(s),
            Self::UserPass(s) => serde_json::to_vec(s),
            Self::OAuth(s) => serde_json::to_vec(s),
            Self::SshKey(s) => serde_json::to_vec(s),
            Self::DbConnection(s) => serde_json::to_vec(s),
            Self::Custom(map) => serde_json::to_vec(map),
        }
        .map_err(|_| schema())?;
        Ok(Zeroizing::new(bytes))
    }

    pub(crate) fn from_bytes(
        credential_type: CredentialType,
        bytes: &[u8],
    ) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|_| PayloadError::Schema(credential_type))?;
        Self::from_value(credential_type, value)
    }

    /// The string injected into a sandboxed run for this credential.
    ///
    /// Single-secret types yield the secret itself; `user_pass` and `custom`
    /// yield compact JSON so every field stays available to the script.
    pub fn env_value(&self) -> Zeroizing<String> {
        let value = match self {
            Self::ApiKey(s) => s.api_key.clone(),
            Self::OAuth(s) => s.access_token.clone(),
            Self::SshKey(s) => s.private_key.clone(),
            Self::DbConnection(s) => s.connection_string.clone(),
            Self::UserPass(s) => serde_json::to_string(s).unwrap_or_default(),
            Self::Custom(map) => serde_json::to_string(map).unwrap_or_default(),
        };
        Zeroizing::new(value)
    }

    /// Every secret string in the payload, for scrubbing captured output
    pub fn secret_values(&self) -> Vec<String> {
        let mut values: Vec<String> = match self {
            Self::ApiKey(s) => {
                let mut v = vec![s.api_key.clone()];
                if let Some(headers) = &s.headers {
                    v.extend(headers.values().cloned());
                }
                v
            }
            Self::UserPass(s) => vec![s.password.clone()],
            Self::OAuth(s) => [Some(&s.access_token), s.refresh_token.as_ref()]
                .into_iter()
                .flatten()
                .cloned()
                .collect(),
            Self::SshKey(s) => [Some(&s.private_key), s.passphrase.as_ref()]
                .into_iter()
                .flatten()
                .cloned()
                .collect(),
            Self::DbConnection(s) => [Some(&s.connection_string), s.password.as_ref()]
                .into_iter()
                .flatten()
                .cloned()
                .collect(),
            Self::Custom(map) => map
                .iter()
                .filter(|(key, _)| is_sensitive_key(key))
                .filter_map(|(_, value)| value.as_str().map(String::from))
                .collect(),
        };
        values.push(self.env_value().to_string());
        values.retain(|v| !v.is_empty());
        values
    }

    /// Display-safe view of the payload with secret fields masked
    pub fn masked(&self) -> Value {
        let mut out = Map::new();
        match self {
            Self::ApiKey(s) => {
                out.insert("api_key".into(), mask_value(&s.api_key).into());
                if let Some(base_url) = &s.base_url {
                    out.insert("base_url".into(), base_url.clone().into());
                }
                if let Some(headers) = &s.headers {
                    let masked: Map<String, Value> = headers
                        .iter()
                        .map(|(k, v)| (k.clone(), mask_value(v).into()))
                        .collect();
                    out.insert("headers".into(), Value::Object(masked));
                }
            }
            Self::UserPass(s) => {
                out.insert("username".into(), s.username.clone().into());
                out.insert("password".into(), mask_value(&s.password).into());
                if let Some(domain) = &s.domain {
                    out.insert("domain".into(), domain.clone().into());
                }
            }
            Self::OAuth(s) => {
                out.insert("access_token".into(), mask_value(&s.access_token).into());
                if let Some(refresh) = &s.refresh_token {
                    out.insert("refresh_token".into(), mask_value(refresh).into());
                }
                if let Some(expires_in) = s.expires_in {
                    out.insert("expires_in".into(), expires_in.into());
                }
                if let Some(token_type) = &s.token_type {
                    out.insert("token_type".into(), token_type.clone().into());
                }
            }
            Self::SshKey(s) => {
                out.insert("private_key".into(), mask_value(&s.private_key).into());
                if let Some(public_key) = &s.public_key {
                    out.insert("public_key".into(), public_key.clone().into());
                }
                if let Some(passphrase) = &s.passphrase {
                    out.insert("passphrase".into(), mask_value(passphrase).into());
                }
            }
            Self::DbConnection(s) => {
                out.insert(
                    "connection_string".into(),
                    mask_value(&s.connection_string).into(),
                );
                if let Some(username) = &s.username {
                    out.insert("username".into(), username.clone().into());
                }
                if let Some(password) = &s.password {
                    out.insert("password".into(), mask_value(password).into());
                }
                if let Some(database) = &s.database {
                    out.insert("database".into(), database.clone().into());
                }
            }
            Self::Custom(map) => {
                for (key, value) in map {
                    let shown: Value = match value {
                        Value::String(s) if is_sensitive_key(key) => mask_value(s).into(),
                        other if is_sensitive_key(key) => mask_value(&other.to_string()).into(),
                        other => other.clone(),
                    };
                    out.insert(key.clone(), shown);
                }
            }
        }
        Value::Object(out)
    }
}

impl fmt::Debug for CredentialPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialPayload::{}(<redacted>)", self.credential_type())
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["password", "key", "token", "secret"]
        .iter()
        .any(|needle| key.contains(needle))
}

/// Keep the first and last four characters of values longer than eight; mask the rest
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("", "")]
    #[case("short", "*****")]
    #[case("12345678", "********")]
    #[case("sk-live-abcdefgh", "sk-l********efgh")]
    fn test_mask_value(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(mask_value(input), expected);
    }

    #[rstest]
    #[case(CredentialType::ApiKey, json!({"api_key": "k"}))]
    #[case(CredentialType::UserPass, json!({"username": "u", "password": "p"}))]
    #[case(CredentialType::OAuth, json!({"access_token": "t", "expires_in": 3600}))]
    #[case(CredentialType::SshKey, json!({"private_key": "-----BEGIN"}))]
    #[case(CredentialType::DbConnection, json!({"connection_string": "postgres://x"}))]
    #[case(CredentialType::Custom, json!({"anything": 1}))]
    fn test_valid_payloads(#[case] credential_type: CredentialType, #[case] value: Value) {
        let payload = CredentialPayload::from_value(credential_type, value).unwrap();
        assert_eq!(payload.credential_type(), credential_type);
    }

    #[rstest]
    #[case(CredentialType::ApiKey, json!({"base_url": "https://api"}))]
    #[case(CredentialType::ApiKey, json!({"api_key": "   "}))]
    #[case(CredentialType::UserPass, json!({"username": "u"}))]
    #[case(CredentialType::UserPass, json!({"username": "u", "password": ""}))]
    #[case(CredentialType::OAuth, json!({"refresh_token": "r"}))]
    #[case(CredentialType::SshKey, json!({"public_key": "ssh-ed25519"}))]
    #[case(CredentialType::DbConnection, json!({"database": "main"}))]
    #[case(CredentialType::Custom, json!({}))]
    #[case(CredentialType::Custom, json!("just a string"))]
    fn test_invalid_payloads(#[case] credential_type: CredentialType, #[case] value: Value) {
        assert!(CredentialPayload::from_value(credential_type, value).is_err());
    }

    #[test]
    fn test_env_value_selection() {
        let api = CredentialPayload::from_value(
            CredentialType::ApiKey,
            json!({"api_key": "sk-123", "base_url": "https://api"}),
        )
        .unwrap();
        assert_eq!(api.env_value().as_str(), "sk-123");

        let login = CredentialPayload::from_value(
            CredentialType::UserPass,
            json!({"username": "ana", "password": "hunter22"}),
        )
        .unwrap();
        let decoded: Value = serde_json::from_str(&login.env_value()).unwrap();
        assert_eq!(decoded, json!({"username": "ana", "password": "hunter22"}));
    }

    #[test]
    fn test_masked_custom_hides_sensitive_keys() {
        let payload = CredentialPayload::from_value(
            CredentialType::Custom,
            json!({"region": "eu-west-1", "secret_key": "abcdefghijklmnop", "pin_token": 1234}),
        )
        .unwrap();
        assert_eq!(
            payload.masked(),
            json!({"region": "eu-west-1", "secret_key": "abcd********mnop", "pin_token": "****"})
        );
    }

    #[test]
    fn test_masked_user_pass_keeps_username() {
        let payload = CredentialPayload::from_value(
            CredentialType::UserPass,
            json!({"username": "ana", "password": "correct-horse-battery"}),
        )
        .unwrap();
        let masked = payload.masked();
        assert_eq!(masked["username"], "ana");
        assert_eq!(masked["password"], "corr*************tery");
    }

    #[test]
    fn test_debug_is_redacted() {
        let payload =
            CredentialPayload::from_value(CredentialType::ApiKey, json!({"api_key": "sk-999"}))
                .unwrap();
        let debug = format!("{:?}", payload);
        assert_eq!(debug, "CredentialPayload::api_key(<redacted>)");
    }

    #[test]
    fn test_secret_values_cover_all_secrets() {
        let payload = CredentialPayload::from_value(
            CredentialType::OAuth,
            json!({"access_token": "at-1", "refresh_token": "rt-2", "token_type": "Bearer"}),
        )
        .unwrap();
        let secrets = payload.secret_values();
        assert!(secrets.contains(&"at-1".to_string()));
        assert!(secrets.contains(&"rt-2".to_string()));
        assert!(!secrets.contains(&"Bearer".to_string()));
    }

    #[test]
    fn test_bytes_roundtrip_excludes_type_tag() {
        let payload =
            CredentialPayload::from_value(CredentialType::SshKey, json!({"private_key": "pk"}))
                .unwrap();
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(&bytes[..], br#"{"private_key":"pk"}"#);
        assert_eq!(
            CredentialPayload::from_bytes(CredentialType::SshKey, &bytes).unwrap(),
            payload
        );
    }
}
