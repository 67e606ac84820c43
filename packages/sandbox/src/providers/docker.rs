// ABOUTME: Docker provider implementation for isolated script containers
// ABOUTME: Uses bollard to create locked-down containers, upload scripts and collect output

use super::{
    CapturedOutput, ContainerSpec, ManagedContainer, Provider, ProviderError, Result,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
        LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
        UploadToContainerOptions, WaitContainerOptions,
    },
    models::HostConfig,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label marking containers owned by Automa
pub const MANAGED_LABEL: &str = "automa.managed";

pub struct DockerProvider {
    client: Docker,
}

impl DockerProvider {
    /// Connect using DOCKER_HOST or the platform default socket
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }
}

/// Translate a spec into the bollard container config with isolation applied
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut labels = spec.labels.clone();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let memory_bytes = (spec.limits.memory_mb * 1024 * 1024) as i64;

    let host_config = HostConfig {
        memory: Some(memory_bytes),
        // Same as memory: no swap on top of the limit
        memory_swap: Some(memory_bytes),
        nano_cpus: Some((spec.limits.cpu_limit * 1_000_000_000.0) as i64),
        pids_limit: Some(spec.limits.pids_limit),
        network_mode: Some(String::from(if spec.network_enabled {
            "bridge"
        } else {
            "none"
        })),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        privileged: Some(false),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        env: Some(env),
        user: Some(spec.user.clone()),
        working_dir: Some(spec.work_dir.clone()),
        labels: Some(labels),
        network_disabled: Some(!spec.network_enabled),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn is_exhaustion(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "no space left",
        "cannot allocate memory",
        "out of memory",
        "too many",
        "resource temporarily unavailable",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Classify a bollard error for retry decisions
fn map_error(error: bollard::errors::Error) -> ProviderError {
    use bollard::errors::Error as E;

    match error {
        E::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => ProviderError::NotFound(message),
            400 => ProviderError::InvalidConfig(message),
            _ if is_exhaustion(&message) => ProviderError::ResourceExhausted(message),
            502..=504 => ProviderError::Unreachable(message),
            _ => ProviderError::Container(format!("{}: {}", status_code, message)),
        },
        E::IOError { err } => ProviderError::Unreachable(err.to_string()),
        E::RequestTimeoutError => ProviderError::Unreachable("request timed out".to_string()),
        E::SocketNotFoundError(path) => {
            ProviderError::Unreachable(format!("socket not found: {}", path))
        }
        other => {
            let message = other.to_string();
            if message.to_lowercase().contains("connect") {
                ProviderError::Unreachable(message)
            } else {
                ProviderError::Container(message)
            }
        }
    }
}

/// Tar archive holding one file, as expected by the upload endpoint
fn single_file_tar(file_name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);

    let mut archive = tar::Builder::new(Vec::new());
    archive.append_data(&mut header, file_name, contents)?;
    archive.into_inner()
}

#[async_trait]
impl Provider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("Docker ping failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| match map_error(e) {
                ProviderError::NotFound(_) => ProviderError::ImageNotFound(spec.image.clone()),
                other => other,
            })?;

        for warning in &response.warnings {
            warn!(container = %spec.name, "Docker warning: {}", warning);
        }
        debug!(container_id = %response.id, name = %spec.name, "Created container");
        Ok(response.id)
    }

    async fn upload_file(
        &self,
        container_id: &str,
        dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<()> {
        let tar_data = single_file_tar(file_name, contents)
            .map_err(|e| ProviderError::Container(format!("failed to build archive: {}", e)))?;

        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container_id, Some(options), tar_data.into())
            .await
            .map_err(map_error)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)?;
        info!(container_id, "Started container");
        Ok(())
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.client.wait_container(container_id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(map_error(e)),
            None => Err(ProviderError::Container(
                "wait stream ended without an exit status".to_string(),
            )),
        }
    }

    async fn collect_logs(&self, container_id: &str) -> Result<CapturedOutput> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut stream = self.client.logs(container_id, Some(options));
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk.map_err(map_error)? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.extend_from_slice(&message)
                }
                LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn stop_container(&self, container_id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.client.stop_container(container_id, Some(options)).await {
            Ok(_) => Ok(()),
            // 304 means already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        let options = KillContainerOptions { signal: "SIGKILL" };

        match self.client.kill_container(container_id, Some(options)).await {
            Ok(_) => Ok(()),
            // 409 means the container is not running any more
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(map_error)?;
        debug!(container_id, "Removed container");
        Ok(())
    }

    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .unwrap_or_else(|| id.clone())
                    .trim_start_matches('/')
                    .to_string();
                Some(ManagedContainer {
                    running: c.state.as_deref() == Some("running"),
                    labels: c.labels.unwrap_or_default(),
                    id,
                    name,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ResourceLimits;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn spec(network_enabled: bool) -> ContainerSpec {
        ContainerSpec {
            name: "automa-job-abc".to_string(),
            image: "automa-sandbox:latest".to_string(),
            command: vec!["python".to_string(), "/app/script.py".to_string()],
            env: BTreeMap::from([("API_TOKEN".to_string(), "t0k3n".to_string())]),
            user: "sandbox:sandbox".to_string(),
            work_dir: "/app".to_string(),
            limits: ResourceLimits {
                memory_mb: 256,
                cpu_limit: 0.5,
                pids_limit: 64,
            },
            network_enabled,
            labels: HashMap::from([("automa.run".to_string(), "job_1".to_string())]),
        }
    }

    #[test]
    fn test_container_config_applies_isolation() {
        let config = container_config(&spec(false));
        let host = config.host_config.clone().unwrap();

        assert_eq!(config.image.as_deref(), Some("automa-sandbox:latest"));
        assert_eq!(config.user.as_deref(), Some("sandbox:sandbox"));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(host.privileged, Some(false));
        assert_eq!(host.binds, None);
        assert_eq!(config.env, Some(vec!["API_TOKEN=t0k3n".to_string()]));

        let labels = config.labels.unwrap();
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.get("automa.run").map(String::as_str), Some("job_1"));
    }

    #[test]
    fn test_network_can_be_enabled() {
        let config = container_config(&spec(true));
        assert_eq!(config.network_disabled, Some(false));
        assert_eq!(
            config.host_config.unwrap().network_mode.as_deref(),
            Some("bridge")
        );
    }

    #[test]
    fn test_error_mapping() {
        use bollard::errors::Error as E;

        let server = |status_code: u16, message: &str| E::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        };

        assert!(matches!(map_error(server(404, "no such container")), ProviderError::NotFound(_)));
        assert!(matches!(map_error(server(400, "bad memory")), ProviderError::InvalidConfig(_)));
        assert!(matches!(
            map_error(server(500, "write /var/lib/docker: no space left on device")),
            ProviderError::ResourceExhausted(_)
        ));
        assert!(matches!(map_error(server(503, "unavailable")), ProviderError::Unreachable(_)));
        assert!(matches!(map_error(server(500, "boom")), ProviderError::Container(_)));
        assert!(matches!(map_error(E::RequestTimeoutError), ProviderError::Unreachable(_)));
        assert!(matches!(
            map_error(E::SocketNotFoundError("/var/run/docker.sock".into())),
            ProviderError::Unreachable(_)
        ));
    }

    #[test]
    fn test_single_file_tar_contains_only_script() {
        let data = single_file_tar("script.py", b"print('hi')").unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(paths, vec!["script.py".to_string()]);
    }
}
