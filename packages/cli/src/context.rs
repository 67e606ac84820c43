// ABOUTME: Builds every Automa service from one AutomaConfig
// ABOUTME: Also performs startup recovery: interrupted executions and orphaned containers

use anyhow::{Context, Result};
use automa_config::AutomaConfig;
use automa_core::AgentStatus;
use automa_executions::{AgentSupervisor, Coordinator, EnvPasswordSource, PasswordSource};
use automa_sandbox::{DockerProvider, ManagedContainer, Provider, RetryPolicy, SandboxRuntime};
use automa_scheduler::Scheduler;
use automa_security::{CredentialService, CredentialVault, KdfParams};
use automa_storage::Storage;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// What startup recovery cleaned up
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub interrupted_executions: u64,
    pub orphans_removed: usize,
}

pub struct AppContext {
    pub config: AutomaConfig,
    pub storage: Storage,
    pub sandbox: Arc<SandboxRuntime>,
    pub coordinator: Coordinator,
    pub supervisor: AgentSupervisor,
}

impl AppContext {
    /// Open the configured database and connect to the local Docker daemon
    pub async fn connect(config: AutomaConfig) -> Result<Self> {
        let storage = Storage::connect(&config.database.url)
            .await
            .with_context(|| format!("Failed to open database {}", config.database.url))?;
        let provider = DockerProvider::new().context("Failed to connect to Docker")?;
        Ok(Self::assemble(
            config,
            storage,
            Arc::new(provider),
            Arc::new(EnvPasswordSource),
        ))
    }

    pub fn assemble(
        config: AutomaConfig,
        storage: Storage,
        provider: Arc<dyn Provider>,
        passwords: Arc<dyn PasswordSource>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let sandbox = Arc::new(
            SandboxRuntime::new(provider, config.sandbox.clone()).with_agent_retry(retry.clone()),
        );
        let credentials = CredentialService::new(
            storage.clone(),
            CredentialVault::new(KdfParams::from(config.vault)),
        );

        let coordinator = Coordinator::new(
            storage.clone(),
            credentials.clone(),
            sandbox.clone(),
            retry,
            passwords.clone(),
        );
        let supervisor = AgentSupervisor::new(storage.clone(), credentials, sandbox.clone(), passwords);

        Self {
            config,
            storage,
            sandbox,
            coordinator,
            supervisor,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.storage.clone(),
            Arc::new(self.coordinator.clone()),
            self.config.scheduler.clone(),
        )
    }

    /// Fail executions a previous process left in flight and remove its
    /// orphaned containers
    pub async fn recover(&self) -> Result<StartupReport> {
        let interrupted_executions = self.coordinator.recover().await?;
        let orphans_removed = self.remove_orphans().await?.len();

        info!(interrupted_executions, orphans_removed, "Startup recovery finished");
        Ok(StartupReport {
            interrupted_executions,
            orphans_removed,
        })
    }

    /// Remove managed containers that no running agent owns
    pub async fn remove_orphans(&self) -> Result<Vec<ManagedContainer>> {
        let keep: HashSet<String> = self
            .storage
            .list_agents_by_status(AgentStatus::Running)
            .await?
            .into_iter()
            .filter_map(|agent| agent.container_id)
            .collect();
        Ok(self.sandbox.cleanup_orphans(&keep).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automa_core::{Agent, Script};
    use automa_executions::StaticPasswordSource;
    use automa_sandbox::testing::FakeProvider;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    async fn context() -> (AppContext, Arc<FakeProvider>) {
        let storage = Storage::in_memory().await.unwrap();
        let provider = Arc::new(FakeProvider::new());
        let ctx = AppContext::assemble(
            AutomaConfig::default(),
            storage,
            provider.clone(),
            Arc::new(StaticPasswordSource::new()),
        );
        (ctx, provider)
    }

    async fn agent(storage: &Storage) -> Agent {
        let now = Utc::now();
        let script = storage
            .create_script(Script {
                id: String::new(),
                name: "watcher".to_string(),
                description: None,
                content: "import time\nwhile True: time.sleep(60)\n".to_string(),
                created_by: "user_1".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        storage
            .create_agent(Agent {
                id: String::new(),
                name: "watcher".to_string(),
                description: None,
                script_id: Some(script.id),
                status: AgentStatus::Stopped,
                container_id: None,
                created_by: "user_1".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_recover_keeps_running_agent_containers() {
        let (ctx, provider) = context().await;
        let kept = agent(&ctx.storage).await;
        let lost = agent(&ctx.storage).await;
        let kept = ctx.supervisor.start_agent(&kept.id, None).await.unwrap();
        ctx.supervisor.start_agent(&lost.id, None).await.unwrap();

        // The row forgot its container, as after a crash mid-update
        ctx.storage
            .update_agent_status(&lost.id, AgentStatus::Stopped, None)
            .await
            .unwrap();

        let report = ctx.recover().await.unwrap();

        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.interrupted_executions, 0);
        assert_eq!(provider.live_containers(), 1);
        assert!(!provider.removed().contains(&kept.container_id.unwrap()));
    }

    #[tokio::test]
    async fn test_scheduler_starts_with_no_jobs() {
        let (ctx, _) = context().await;
        let scheduler = ctx.scheduler();
        assert_eq!(scheduler.active_jobs(), 0);
        assert_eq!(scheduler.load_active_jobs().await.unwrap(), 0);
    }
}
