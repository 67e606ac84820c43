// ABOUTME: Provider trait for the container-orchestration backend of the sandbox runtime
// ABOUTME: Errors carry the retryable / non-retryable classification used by RetryPolicy

use async_trait::async_trait;
use automa_core::ErrorKind;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Daemon socket missing, connection refused, request timed out
    #[error("Container daemon unreachable: {0}")]
    Unreachable(String),

    /// Out of memory, disk or container slots on the host
    #[error("Container resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Invalid container configuration: {0}")]
    InvalidConfig(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container error: {0}")]
    Container(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Default classification used by [`crate::RetryPolicy`]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::ResourceExhausted(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageNotFound(_) | Self::InvalidConfig(_) => ErrorKind::TerminalConfig,
            _ => ErrorKind::TransientInfra,
        }
    }
}

/// Resource ceiling applied to every sandbox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    /// Fraction of one CPU
    pub cpu_limit: f64,
    pub pids_limit: i64,
}

/// Everything needed to create one isolated container
#[derive(Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub user: String,
    pub work_dir: String,
    pub limits: ResourceLimits,
    pub network_enabled: bool,
    pub labels: HashMap<String, String>,
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Environment values are credential material
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("command", &self.command)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("user", &self.user)
            .field("work_dir", &self.work_dir)
            .field("limits", &self.limits)
            .field("network_enabled", &self.network_enabled)
            .field("labels", &self.labels)
            .finish()
    }
}

/// Captured stdout / stderr of a finished container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A container carrying the managed label, as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
}

/// Container-orchestration contract the sandbox runtime is written against
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the backend daemon answers
    async fn is_available(&self) -> Result<bool>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Create (but do not start) a container with limits applied
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Write a single file into `dir` of a created container
    async fn upload_file(
        &self,
        container_id: &str,
        dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<()>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Block until the container exits and return its exit code
    async fn wait_container(&self, container_id: &str) -> Result<i64>;

    /// Everything the container wrote to stdout and stderr
    async fn collect_logs(&self, container_id: &str) -> Result<CapturedOutput>;

    /// Ask the container to stop, escalating to SIGKILL after `grace`
    async fn stop_container(&self, container_id: &str, grace: Duration) -> Result<()>;

    /// SIGKILL the container immediately
    async fn kill_container(&self, container_id: &str) -> Result<()>;

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    /// All containers carrying the managed label, running or not
    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProviderError::Unreachable("socket".into()), true)]
    #[case(ProviderError::ResourceExhausted("oom".into()), true)]
    #[case(ProviderError::ImageNotFound("img".into()), false)]
    #[case(ProviderError::InvalidConfig("bad".into()), false)]
    #[case(ProviderError::NotFound("c1".into()), false)]
    #[case(ProviderError::Container("boom".into()), false)]
    fn test_retry_classification(#[case] error: ProviderError, #[case] retryable: bool) {
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn test_missing_image_is_terminal_config() {
        assert_eq!(
            ProviderError::ImageNotFound("x".into()).kind(),
            ErrorKind::TerminalConfig
        );
        assert_eq!(
            ProviderError::Unreachable("x".into()).kind(),
            ErrorKind::TransientInfra
        );
    }

    #[test]
    fn test_spec_debug_hides_env_values() {
        let spec = ContainerSpec {
            name: "automa-job-1".into(),
            image: "automa-sandbox:latest".into(),
            command: vec!["python".into()],
            env: BTreeMap::from([("TOKEN".to_string(), "s3cr3t".to_string())]),
            user: "sandbox".into(),
            work_dir: "/app".into(),
            limits: ResourceLimits {
                memory_mb: 256,
                cpu_limit: 0.5,
                pids_limit: 64,
            },
            network_enabled: false,
            labels: HashMap::new(),
        };
        let debug = format!("{:?}", spec);
        assert!(debug.contains("TOKEN"));
        assert!(!debug.contains("s3cr3t"));
    }
}
