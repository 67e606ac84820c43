// ABOUTME: Sources of the owner's vault password for unattended runs
// ABOUTME: The password is fetched per run and never cached by the coordinator

use crate::error::{ExecutionError, Result};
use async_trait::async_trait;
use automa_config::constants::AUTOMA_VAULT_PASSWORD;
use std::collections::HashMap;
use std::env;
use zeroize::Zeroizing;

#[async_trait]
pub trait PasswordSource: Send + Sync {
    /// The live vault password of `owner`
    async fn password_for(&self, owner: &str) -> Result<Zeroizing<String>>;
}

/// Reads `AUTOMA_VAULT_PASSWORD` at call time, for single-owner deployments
#[derive(Debug, Clone, Default)]
pub struct EnvPasswordSource;

#[async_trait]
impl PasswordSource for EnvPasswordSource {
    async fn password_for(&self, owner: &str) -> Result<Zeroizing<String>> {
        match env::var(AUTOMA_VAULT_PASSWORD) {
            Ok(password) if !password.is_empty() => Ok(Zeroizing::new(password)),
            _ => Err(ExecutionError::PasswordUnavailable(owner.to_string())),
        }
    }
}

/// Fixed passwords per owner
#[derive(Default)]
pub struct StaticPasswordSource {
    passwords: HashMap<String, Zeroizing<String>>,
}

impl StaticPasswordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, owner: impl Into<String>, password: impl Into<String>) -> Self {
        self.passwords
            .insert(owner.into(), Zeroizing::new(password.into()));
        self
    }
}

#[async_trait]
impl PasswordSource for StaticPasswordSource {
    async fn password_for(&self, owner: &str) -> Result<Zeroizing<String>> {
        self.passwords
            .get(owner)
            .cloned()
            .ok_or_else(|| ExecutionError::PasswordUnavailable(owner.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_knows_only_its_owners() {
        let source = StaticPasswordSource::new().with("user_1", "hunter2");
        assert_eq!(source.password_for("user_1").await.unwrap().as_str(), "hunter2");
        assert!(matches!(
            source.password_for("user_2").await,
            Err(ExecutionError::PasswordUnavailable(owner)) if owner == "user_2"
        ));
    }
}
