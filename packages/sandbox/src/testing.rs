// ABOUTME: In-memory Provider used by tests across the workspace
// ABOUTME: Scripted failures, exit codes and run durations; records every container it touched

use crate::providers::{
    CapturedOutput, ContainerSpec, ManagedContainer, Provider, ProviderError, Result,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    labels: HashMap<String, String>,
    running: bool,
}

#[derive(Debug)]
struct FakeState {
    available: bool,
    image_present: bool,
    create_failures: VecDeque<ProviderError>,
    start_failures: VecDeque<ProviderError>,
    exit_code: i64,
    run_duration: Duration,
    hang: bool,
    output: CapturedOutput,
    next_id: u64,
    live: BTreeMap<String, FakeContainer>,
    created: Vec<String>,
    removed: Vec<String>,
    killed: Vec<String>,
    last_env: BTreeMap<String, String>,
    uploaded_script: Option<String>,
}

/// Provider double. Every container it "creates" lives in memory until removed.
#[derive(Debug)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                available: true,
                image_present: true,
                create_failures: VecDeque::new(),
                start_failures: VecDeque::new(),
                exit_code: 0,
                run_duration: Duration::ZERO,
                hang: false,
                output: CapturedOutput::default(),
                next_id: 0,
                live: BTreeMap::new(),
                created: Vec::new(),
                removed: Vec::new(),
                killed: Vec::new(),
                last_env: BTreeMap::new(),
                uploaded_script: None,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn set_available(&self, available: bool) {
        self.with_state(|s| s.available = available);
    }

    pub fn set_image_present(&self, present: bool) {
        self.with_state(|s| s.image_present = present);
    }

    /// Errors returned by the next create calls, in order
    pub fn fail_creates(&self, errors: Vec<ProviderError>) {
        self.with_state(|s| s.create_failures.extend(errors));
    }

    /// Errors returned by the next start calls, in order
    pub fn fail_starts(&self, errors: Vec<ProviderError>) {
        self.with_state(|s| s.start_failures.extend(errors));
    }

    pub fn set_exit_code(&self, exit_code: i64) {
        self.with_state(|s| s.exit_code = exit_code);
    }

    /// How long `wait_container` takes before reporting the exit code
    pub fn set_run_duration(&self, duration: Duration) {
        self.with_state(|s| s.run_duration = duration);
    }

    /// Containers never exit on their own
    pub fn hang(&self) {
        self.with_state(|s| s.hang = true);
    }

    pub fn set_output(&self, stdout: &str, stderr: &str) {
        self.with_state(|s| {
            s.output = CapturedOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }
        });
    }

    pub fn live_containers(&self) -> usize {
        self.with_state(|s| s.live.len())
    }

    pub fn created(&self) -> Vec<String> {
        self.with_state(|s| s.created.clone())
    }

    pub fn removed(&self) -> Vec<String> {
        self.with_state(|s| s.removed.clone())
    }

    pub fn killed(&self) -> Vec<String> {
        self.with_state(|s| s.killed.clone())
    }

    /// Environment of the most recently created container
    pub fn last_env(&self) -> BTreeMap<String, String> {
        self.with_state(|s| s.last_env.clone())
    }

    pub fn uploaded_script(&self) -> Option<String> {
        self.with_state(|s| s.uploaded_script.clone())
    }

    fn require(&self, container_id: &str) -> Result<()> {
        self.with_state(|s| {
            if s.live.contains_key(container_id) {
                Ok(())
            } else {
                Err(ProviderError::NotFound(container_id.to_string()))
            }
        })
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn is_available(&self) -> Result<bool> {
        Ok(self.with_state(|s| s.available))
    }

    async fn image_exists(&self, _image: &str) -> Result<bool> {
        Ok(self.with_state(|s| s.image_present))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.with_state(|s| {
            if let Some(error) = s.create_failures.pop_front() {
                return Err(error);
            }
            s.next_id += 1;
            let id = format!("fake-{}", s.next_id);
            s.live.insert(
                id.clone(),
                FakeContainer {
                    name: spec.name.clone(),
                    labels: spec.labels.clone(),
                    running: false,
                },
            );
            s.created.push(id.clone());
            s.last_env = spec.env.clone();
            Ok(id)
        })
    }

    async fn upload_file(
        &self,
        container_id: &str,
        _dir: &str,
        _file_name: &str,
        contents: &[u8],
    ) -> Result<()> {
        self.require(container_id)?;
        let script = String::from_utf8_lossy(contents).into_owned();
        self.with_state(|s| s.uploaded_script = Some(script));
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.require(container_id)?;
        self.with_state(|s| {
            if let Some(error) = s.start_failures.pop_front() {
                return Err(error);
            }
            if let Some(container) = s.live.get_mut(container_id) {
                container.running = true;
            }
            Ok(())
        })
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        self.require(container_id)?;
        let (hang, duration, exit_code) =
            self.with_state(|s| (s.hang, s.run_duration, s.exit_code));
        if hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(duration).await;
        self.with_state(|s| {
            if let Some(container) = s.live.get_mut(container_id) {
                container.running = false;
            }
        });
        Ok(exit_code)
    }

    async fn collect_logs(&self, container_id: &str) -> Result<CapturedOutput> {
        self.require(container_id)?;
        Ok(self.with_state(|s| s.output.clone()))
    }

    async fn stop_container(&self, container_id: &str, _grace: Duration) -> Result<()> {
        self.require(container_id)?;
        self.with_state(|s| {
            if let Some(container) = s.live.get_mut(container_id) {
                container.running = false;
            }
        });
        Ok(())
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        self.require(container_id)?;
        self.with_state(|s| {
            if let Some(container) = s.live.get_mut(container_id) {
                container.running = false;
            }
            s.killed.push(container_id.to_string());
        });
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> Result<()> {
        self.with_state(|s| match s.live.remove(container_id) {
            Some(_) => {
                s.removed.push(container_id.to_string());
                Ok(())
            }
            None => Err(ProviderError::NotFound(container_id.to_string())),
        })
    }

    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>> {
        Ok(self.with_state(|s| {
            s.live
                .iter()
                .map(|(id, c)| ManagedContainer {
                    id: id.clone(),
                    name: c.name.clone(),
                    running: c.running,
                    labels: c.labels.clone(),
                })
                .collect()
        }))
    }
}
