// ABOUTME: Turns an agent's script and its credential assignments into a ready-to-run environment
// ABOUTME: Any decrypt failure aborts before a sandbox is requested

use crate::error::{ExecutionError, Result};
use crate::password::PasswordSource;
use automa_core::{Agent, Script};
use automa_sandbox::RunEnv;
use automa_security::CredentialService;
use automa_storage::Storage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Script plus decrypted environment for one run
pub(crate) struct ResolvedScript {
    pub script: Script,
    pub env: RunEnv,
    /// Every secret string injected, for scrubbing captured output
    pub secrets: Zeroizing<Vec<String>>,
}

#[derive(Clone)]
pub(crate) struct ScriptResolver {
    pub storage: Storage,
    pub credentials: CredentialService,
    pub passwords: Arc<dyn PasswordSource>,
}

impl ScriptResolver {
    pub async fn resolve(
        &self,
        agent: &Agent,
        owner: &str,
        password: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedScript> {
        let script_id = agent
            .script_id
            .as_deref()
            .ok_or_else(|| ExecutionError::MissingScript(agent.id.clone()))?;
        let script = self.storage.get_script(script_id).await?;
        let bindings = self.storage.list_active_script_credentials(&script.id).await?;

        let mut env = RunEnv::new();
        let mut secrets = Zeroizing::new(Vec::new());
        if bindings.is_empty() {
            return Ok(ResolvedScript {
                script,
                env,
                secrets,
            });
        }

        // Only fetched when something actually needs decrypting
        let password = match password {
            Some(p) => Zeroizing::new(p.to_string()),
            None => self.passwords.password_for(owner).await?,
        };

        for binding in &bindings {
            let payload = self
                .credentials
                .decrypt(&binding.credential_id, &password, now)
                .await?;
            env.insert(binding.variable_name.clone(), payload.env_value().as_str());
            secrets.extend(payload.secret_values());
            debug!(
                script_id = %script.id,
                variable = %binding.variable_name,
                "Credential resolved"
            );
        }

        Ok(ResolvedScript {
            script,
            env,
            secrets,
        })
    }
}

/// Replace every occurrence of a secret with `***`, longest secrets first
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut ordered: Vec<&String> = secrets.iter().filter(|s| !s.is_empty()).collect();
    ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mut out = text.to_string();
    for secret in ordered {
        if out.contains(secret.as_str()) {
            out = out.replace(secret.as_str(), "***");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_redact_replaces_every_occurrence() {
        let secrets = vec!["sk-123".to_string()];
        assert_eq!(
            redact("key=sk-123 again sk-123", &secrets),
            "key=*** again ***"
        );
    }

    #[test]
    fn test_redact_prefers_longest_match() {
        let secrets = vec!["abc".to_string(), "abcdef".to_string()];
        assert_eq!(redact("token abcdef", &secrets), "token ***");
    }

    #[test]
    fn test_redact_ignores_empty_secrets() {
        assert_eq!(redact("plain", &[String::new()]), "plain");
    }
}
