// ABOUTME: Supervision of long-running agents backed by persistent sandbox containers
// ABOUTME: Restart is stop-then-start; shutdown stops every running agent and records failures

use crate::error::{ExecutionError, Result};
use crate::locks::JobLocks;
use crate::password::PasswordSource;
use crate::resolve::ScriptResolver;
use automa_core::{Agent, AgentStatus};
use automa_sandbox::{ContainerHandle, SandboxRuntime};
use automa_security::CredentialService;
use automa_storage::Storage;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of [`AgentSupervisor::shutdown_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct AgentSupervisor {
    storage: Storage,
    resolver: ScriptResolver,
    sandbox: Arc<SandboxRuntime>,
    locks: JobLocks,
}

impl AgentSupervisor {
    pub fn new(
        storage: Storage,
        credentials: CredentialService,
        sandbox: Arc<SandboxRuntime>,
        passwords: Arc<dyn PasswordSource>,
    ) -> Self {
        Self {
            resolver: ScriptResolver {
                storage: storage.clone(),
                credentials,
                passwords,
            },
            storage,
            sandbox,
            locks: JobLocks::new(),
        }
    }

    /// Start the agent's container. A running agent is returned unchanged.
    pub async fn start_agent(&self, agent_id: &str, password: Option<&str>) -> Result<Agent> {
        let _slot = self
            .locks
            .try_acquire(agent_id)
            .ok_or_else(|| ExecutionError::AgentBusy(agent_id.to_string()))?;
        self.start_locked(agent_id, password).await
    }

    /// Stop the agent and remove its container
    pub async fn stop_agent(&self, agent_id: &str) -> Result<Agent> {
        let _slot = self
            .locks
            .try_acquire(agent_id)
            .ok_or_else(|| ExecutionError::AgentBusy(agent_id.to_string()))?;
        self.stop_locked(agent_id).await
    }

    /// Stop then start with a fresh container
    pub async fn restart_agent(&self, agent_id: &str, password: Option<&str>) -> Result<Agent> {
        let _slot = self
            .locks
            .try_acquire(agent_id)
            .ok_or_else(|| ExecutionError::AgentBusy(agent_id.to_string()))?;
        self.stop_locked(agent_id).await?;
        self.start_locked(agent_id, password).await
    }

    async fn start_locked(&self, agent_id: &str, password: Option<&str>) -> Result<Agent> {
        let agent = self.storage.get_agent(agent_id).await?;
        if agent.status == AgentStatus::Running && agent.container_id.is_some() {
            info!(%agent_id, "Agent already running");
            return Ok(agent);
        }

        let resolved = self
            .resolver
            .resolve(&agent, &agent.created_by, password, Utc::now())
            .await?;

        let limits = self.sandbox.default_limits();
        match self
            .sandbox
            .start_long_running(&agent.id, &resolved.script.content, &resolved.env, limits)
            .await
        {
            Ok(handle) => {
                let recorded = self
                    .storage
                    .update_agent_status(&agent.id, AgentStatus::Running, Some(handle.container_id.as_str()))
                    .await;
                if let Err(e) = recorded {
                    // No row points at the container, so nothing else would ever stop it
                    error!(%agent_id, container_id = %handle.container_id, error = %e, "Failed to record started agent");
                    if let Err(stop_err) = self.sandbox.stop(&handle).await {
                        error!(%agent_id, container_id = %handle.container_id, error = %stop_err, "Failed to remove unrecorded agent container");
                    }
                    return Err(e.into());
                }
                info!(%agent_id, container_id = %handle.container_id, "Agent started");
            }
            Err(e) => {
                error!(%agent_id, error = %e, "Agent failed to start");
                self.storage
                    .update_agent_status(&agent.id, AgentStatus::Error, None)
                    .await?;
                return Err(e.into());
            }
        }
        Ok(self.storage.get_agent(agent_id).await?)
    }

    async fn stop_locked(&self, agent_id: &str) -> Result<Agent> {
        let agent = self.storage.get_agent(agent_id).await?;
        if let Some(container_id) = &agent.container_id {
            let handle = ContainerHandle {
                container_id: container_id.clone(),
                name: String::new(),
            };
            if let Err(e) = self.sandbox.stop(&handle).await {
                error!(%agent_id, %container_id, error = %e, "Agent failed to stop");
                self.storage
                    .update_agent_status(&agent.id, AgentStatus::Error, Some(container_id.as_str()))
                    .await?;
                return Err(e.into());
            }
        }
        self.storage
            .update_agent_status(&agent.id, AgentStatus::Stopped, None)
            .await?;
        info!(%agent_id, "Agent stopped");
        Ok(self.storage.get_agent(agent_id).await?)
    }

    /// Stop every running agent. Agents that fail to stop are marked `error`;
    /// a running agent with no container is marked `stopped` and counted as failed.
    pub async fn shutdown_all(&self) -> Result<ShutdownReport> {
        let running = self.storage.list_agents_by_status(AgentStatus::Running).await?;
        if running.is_empty() {
            info!("No running agents to shut down");
            return Ok(ShutdownReport::default());
        }
        info!(count = running.len(), "Shutting down running agents");

        let mut report = ShutdownReport::default();
        for agent in running {
            let Some(container_id) = agent.container_id.clone() else {
                warn!(agent_id = %agent.id, "Agent marked running without a container");
                self.storage
                    .update_agent_status(&agent.id, AgentStatus::Stopped, None)
                    .await?;
                report.failed += 1;
                continue;
            };

            let handle = ContainerHandle {
                container_id: container_id.clone(),
                name: String::new(),
            };
            match self.sandbox.stop(&handle).await {
                Ok(()) => {
                    self.storage
                        .update_agent_status(&agent.id, AgentStatus::Stopped, None)
                        .await?;
                    report.stopped += 1;
                }
                Err(e) => {
                    error!(agent_id = %agent.id, %container_id, error = %e, "Failed to stop agent");
                    self.storage
                        .update_agent_status(&agent.id, AgentStatus::Error, Some(container_id.as_str()))
                        .await?;
                    report.failed += 1;
                }
            }
        }

        info!(
            stopped = report.stopped,
            failed = report.failed,
            "Agent shutdown complete"
        );
        Ok(report)
    }
}
