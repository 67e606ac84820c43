// ABOUTME: Sandbox runtime that runs one script per isolated container with guaranteed teardown
// ABOUTME: One-shot runs race a hard deadline; long-running agents are started and stopped explicitly

use crate::providers::{
    CapturedOutput, ContainerSpec, ManagedContainer, Provider, ProviderError, ResourceLimits,
};
use crate::retry::{RetryError, RetryPolicy};
use automa_config::SandboxConfig;
use automa_core::{truncate, ErrorKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

pub const MANAGED_LABEL: &str = crate::providers::docker::MANAGED_LABEL;
pub const RUN_LABEL: &str = "automa.run";
pub const AGENT_LABEL: &str = "automa.agent";
pub const KIND_LABEL: &str = "automa.kind";

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to launch sandbox: {0}")]
    Launch(#[from] RetryError),

    #[error("Sandbox provider error: {0}")]
    Provider(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Launch(RetryError::Exhausted { .. }) => ErrorKind::TransientInfra,
            Self::Launch(RetryError::Fatal { error, .. }) => error.kind(),
            Self::Provider(error) => error.kind(),
        }
    }

    /// Launch attempts made before giving up, if the failure happened during launch
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Launch(e) => Some(e.attempts()),
            Self::Provider(_) => None,
        }
    }
}

/// Environment injected into one sandbox. Values are wiped from memory on drop.
#[derive(Default, Clone)]
pub struct RunEnv(BTreeMap<String, String>);

impl RunEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let Some(mut previous) = self.0.insert(name.into(), value.into()) {
            previous.zeroize();
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Values, for output redaction
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    fn to_map(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

impl Drop for RunEnv {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}

impl fmt::Debug for RunEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RunEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = RunEnv::new();
        for (name, value) in iter {
            env.insert(name, value);
        }
        env
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub script: String,
    pub env: RunEnv,
    pub limits: ResourceLimits,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    Exited { exit_code: i64 },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub container_id: String,
    pub outcome: RunOutcome,
    pub stdout: String,
    pub stderr: String,
    /// From container start to exit (or to the deadline)
    pub duration: Duration,
    /// Launch attempts, including the successful one
    pub attempts: u32,
}

/// A long-running agent container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub container_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxHealth {
    pub daemon_available: bool,
    pub image: String,
    pub image_present: bool,
}

impl SandboxHealth {
    pub fn is_healthy(&self) -> bool {
        self.daemon_available && self.image_present
    }
}

/// Force-removes its container when torn down or dropped
struct ContainerGuard {
    provider: Arc<dyn Provider>,
    id: Option<String>,
    name: String,
}

impl ContainerGuard {
    fn new(provider: Arc<dyn Provider>, id: String, name: String) -> Self {
        Self {
            provider,
            id: Some(id),
            name,
        }
    }

    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Stop guarding; the caller now owns the container
    fn disarm(mut self) -> String {
        self.id.take().unwrap_or_default()
    }

    async fn teardown(mut self) {
        if let Some(id) = self.id.take() {
            remove_quietly(self.provider.as_ref(), &id).await;
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let provider = self.provider.clone();
                handle.spawn(async move {
                    remove_quietly(provider.as_ref(), &id).await;
                });
            }
            Err(_) => {
                warn!(container_id = %id, "No async runtime to remove container, left for orphan cleanup");
            }
        }
    }
}

async fn remove_quietly(provider: &dyn Provider, id: &str) {
    match provider.remove_container(id, true).await {
        Ok(()) => debug!(container_id = %id, "Removed sandbox container"),
        Err(ProviderError::NotFound(_)) => {}
        Err(e) => warn!(container_id = %id, error = %e, "Failed to remove sandbox container"),
    }
}

#[derive(Debug, Clone, Copy)]
enum ContainerKind {
    Run,
    Agent,
}

impl ContainerKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Agent => "agent",
        }
    }
}

pub struct SandboxRuntime {
    provider: Arc<dyn Provider>,
    config: SandboxConfig,
    agent_retry: RetryPolicy,
}

impl SandboxRuntime {
    pub fn new(provider: Arc<dyn Provider>, config: SandboxConfig) -> Self {
        Self {
            provider,
            config,
            agent_retry: RetryPolicy::default(),
        }
    }

    /// Retry policy used when starting long-running agents
    pub fn with_agent_retry(mut self, policy: RetryPolicy) -> Self {
        self.agent_retry = policy;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn default_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_mb: self.config.memory_mb,
            cpu_limit: self.config.cpu_limit,
            pids_limit: self.config.pids_limit,
        }
    }

    /// A request carrying the configured limits and timeout
    pub fn request(&self, script: impl Into<String>, env: RunEnv) -> RunRequest {
        RunRequest {
            script: script.into(),
            env,
            limits: self.default_limits(),
            timeout: self.config.timeout,
        }
    }

    fn spec(
        &self,
        kind: ContainerKind,
        owner: &str,
        env: &RunEnv,
        limits: ResourceLimits,
    ) -> ContainerSpec {
        let mut labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (KIND_LABEL.to_string(), kind.as_str().to_string()),
        ]);
        let owner_label = match kind {
            ContainerKind::Run => RUN_LABEL,
            ContainerKind::Agent => AGENT_LABEL,
        };
        labels.insert(owner_label.to_string(), owner.to_string());

        ContainerSpec {
            name: format!("automa-{}-{}", kind.as_str(), Uuid::new_v4().simple()),
            image: self.config.image.clone(),
            command: self.config.command.clone(),
            env: env.to_map(),
            user: self.config.user.clone(),
            work_dir: self.config.work_dir.clone(),
            limits,
            network_enabled: self.config.network_enabled,
            labels,
        }
    }

    /// One launch attempt: create, upload the script, start.
    /// A container created by a failed attempt is removed before returning.
    async fn launch(
        &self,
        mut spec: ContainerSpec,
        script: &[u8],
    ) -> std::result::Result<ContainerGuard, ProviderError> {
        let created = self.provider.create_container(&spec).await;
        for value in spec.env.values_mut() {
            value.zeroize();
        }
        let guard = ContainerGuard::new(self.provider.clone(), created?, spec.name);

        let provisioned = match self
            .provider
            .upload_file(guard.id(), &self.config.work_dir, &self.config.script_file, script)
            .await
        {
            Ok(()) => self.provider.start_container(guard.id()).await,
            Err(e) => Err(e),
        };

        match provisioned {
            Ok(()) => Ok(guard),
            Err(e) => {
                guard.teardown().await;
                Err(e)
            }
        }
    }

    async fn launch_with_retry(
        &self,
        kind: ContainerKind,
        owner: &str,
        script: &str,
        env: &RunEnv,
        limits: ResourceLimits,
        policy: &RetryPolicy,
    ) -> std::result::Result<(ContainerGuard, u32), RetryError> {
        policy
            .run(move |attempt| {
                let spec = self.spec(kind, owner, env, limits);
                debug!(attempt, name = %spec.name, "Launching sandbox container");
                self.launch(spec, script.as_bytes())
            })
            .await
    }

    /// Run a script to completion or until `request.timeout` elapses.
    /// The container is removed on every path, including when this future is dropped.
    pub async fn run(&self, request: RunRequest, policy: &RetryPolicy) -> Result<RunResult> {
        let run_id = Uuid::new_v4().to_string();
        let (guard, attempts) = self
            .launch_with_retry(
                ContainerKind::Run,
                &run_id,
                &request.script,
                &request.env,
                request.limits,
                policy,
            )
            .await?;
        info!(
            container_id = %guard.id(),
            attempts,
            timeout_secs = request.timeout.as_secs(),
            "Sandbox started"
        );

        let started = Instant::now();
        let waited = tokio::time::timeout(request.timeout, self.provider.wait_container(guard.id())).await;
        let outcome = match waited {
            Ok(Ok(exit_code)) => RunOutcome::Exited { exit_code },
            Ok(Err(e)) => {
                guard.teardown().await;
                return Err(SandboxError::Provider(e));
            }
            Err(_) => {
                warn!(container_id = %guard.id(), "Sandbox exceeded its deadline, killing");
                if let Err(e) = self.provider.kill_container(guard.id()).await {
                    warn!(container_id = %guard.id(), error = %e, "Failed to kill sandbox container");
                }
                RunOutcome::TimedOut
            }
        };
        let duration = started.elapsed();

        let output = match self.provider.collect_logs(guard.id()).await {
            Ok(output) => output,
            Err(e) => {
                warn!(container_id = %guard.id(), error = %e, "Failed to collect sandbox output");
                CapturedOutput::default()
            }
        };

        let container_id = guard.id().to_string();
        guard.teardown().await;

        debug!(%container_id, ?outcome, duration_ms = duration.as_millis() as u64, "Sandbox finished");
        Ok(RunResult {
            container_id,
            outcome,
            stdout: truncate(&output.stdout, self.config.max_output_bytes),
            stderr: truncate(&output.stderr, self.config.max_output_bytes),
            duration,
            attempts,
        })
    }

    /// Start a persistent agent container and hand ownership to the caller
    pub async fn start_long_running(
        &self,
        agent_id: &str,
        script: &str,
        env: &RunEnv,
        limits: ResourceLimits,
    ) -> Result<ContainerHandle> {
        let (guard, attempts) = self
            .launch_with_retry(ContainerKind::Agent, agent_id, script, env, limits, &self.agent_retry)
            .await?;
        let name = guard.name.clone();
        let container_id = guard.disarm();
        info!(%agent_id, %container_id, attempts, "Agent container started");
        Ok(ContainerHandle { container_id, name })
    }

    /// Stop with the configured grace period, then force remove.
    /// A container that is already gone counts as stopped.
    pub async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        let id = handle.container_id.as_str();
        match self.provider.stop_container(id, self.config.stop_grace).await {
            Ok(()) | Err(ProviderError::NotFound(_)) => {}
            Err(e) => warn!(container_id = %id, error = %e, "Graceful stop failed, forcing removal"),
        }
        match self.provider.remove_container(id, true).await {
            Ok(()) | Err(ProviderError::NotFound(_)) => {
                info!(container_id = %id, "Agent container stopped");
                Ok(())
            }
            Err(e) => Err(SandboxError::Provider(e)),
        }
    }

    /// Stop then start a fresh container; never an in-place signal
    pub async fn restart(
        &self,
        handle: &ContainerHandle,
        agent_id: &str,
        script: &str,
        env: &RunEnv,
        limits: ResourceLimits,
    ) -> Result<ContainerHandle> {
        self.stop(handle).await?;
        self.start_long_running(agent_id, script, env, limits).await
    }

    pub async fn health(&self) -> SandboxHealth {
        let daemon_available = match self.provider.is_available().await {
            Ok(available) => available,
            Err(e) => {
                debug!(error = %e, "Container daemon not available");
                false
            }
        };
        let image_present = daemon_available
            && self
                .provider
                .image_exists(&self.config.image)
                .await
                .unwrap_or(false);

        SandboxHealth {
            daemon_available,
            image: self.config.image.clone(),
            image_present,
        }
    }

    /// Remove every managed container whose id is not in `keep`.
    /// Returns the containers that were removed.
    pub async fn cleanup_orphans(&self, keep: &HashSet<String>) -> Result<Vec<ManagedContainer>> {
        let mut removed = Vec::new();
        for container in self.provider.list_managed_containers().await? {
            if keep.contains(&container.id) {
                continue;
            }
            match self.provider.remove_container(&container.id, true).await {
                Ok(()) | Err(ProviderError::NotFound(_)) => removed.push(container),
                Err(e) => {
                    warn!(container_id = %container.id, error = %e, "Failed to remove orphaned container")
                }
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed orphaned sandbox containers");
        }
        Ok(removed)
    }
}
