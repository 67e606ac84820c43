//! ABOUTME: Shared fixtures for coordinator and agent supervisor tests
//! ABOUTME: In-memory storage, fast KDF parameters and the in-memory container provider

#![allow(dead_code)]

use automa_config::SandboxConfig;
use automa_core::{Agent, AgentStatus, CredentialType, Job, ScheduleType, Script};
use automa_executions::{AgentSupervisor, Coordinator, StaticPasswordSource};
use automa_sandbox::testing::FakeProvider;
use automa_sandbox::{RetryPolicy, SandboxRuntime};
use automa_security::{CredentialPayload, CredentialService, CredentialVault, KdfParams, NewCredential};
use automa_storage::Storage;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const OWNER: &str = "user_1";
pub const PASSWORD: &str = "correct horse battery staple";

const FAST: KdfParams = KdfParams {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

pub struct Harness {
    pub storage: Storage,
    pub provider: Arc<FakeProvider>,
    pub credentials: CredentialService,
    pub coordinator: Coordinator,
    pub supervisor: AgentSupervisor,
    pub script: Script,
    pub agent: Agent,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5), 2.0, Duration::from_millis(20))
}

pub async fn harness() -> Harness {
    harness_with(SandboxConfig::default()).await
}

pub async fn harness_with(config: SandboxConfig) -> Harness {
    let storage = Storage::in_memory().await.unwrap();
    let provider = Arc::new(FakeProvider::new());
    let sandbox = Arc::new(
        SandboxRuntime::new(provider.clone(), config).with_agent_retry(fast_retry()),
    );
    let credentials = CredentialService::new(storage.clone(), CredentialVault::new(FAST));
    let passwords = Arc::new(StaticPasswordSource::new().with(OWNER, PASSWORD));

    let coordinator = Coordinator::new(
        storage.clone(),
        credentials.clone(),
        sandbox.clone(),
        fast_retry(),
        passwords.clone(),
    );
    let supervisor = AgentSupervisor::new(storage.clone(), credentials.clone(), sandbox, passwords);

    let now = Utc::now();
    let script = storage
        .create_script(Script {
            id: String::new(),
            name: "report".to_string(),
            description: None,
            content: "import os\nprint(os.environ.get('API_TOKEN'))\n".to_string(),
            created_by: OWNER.to_string(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    let agent = create_agent(&storage, Some(&script.id)).await;

    Harness {
        storage,
        provider,
        credentials,
        coordinator,
        supervisor,
        script,
        agent,
    }
}

pub async fn create_agent(storage: &Storage, script_id: Option<&str>) -> Agent {
    let now = Utc::now();
    storage
        .create_agent(Agent {
            id: String::new(),
            name: "reporter".to_string(),
            description: None,
            script_id: script_id.map(String::from),
            status: AgentStatus::Stopped,
            container_id: None,
            created_by: OWNER.to_string(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap()
}

impl Harness {
    /// A coordinator sharing the database and container provider, as a second process would
    pub fn peer_coordinator(&self) -> Coordinator {
        Coordinator::new(
            self.storage.clone(),
            self.credentials.clone(),
            Arc::new(SandboxRuntime::new(self.provider.clone(), SandboxConfig::default())),
            RetryPolicy::no_retry(),
            Arc::new(StaticPasswordSource::new().with(OWNER, PASSWORD)),
        )
    }

    pub async fn job_for(&self, agent_id: &str) -> Job {
        let now = Utc::now();
        self.storage
            .create_job(Job {
                id: String::new(),
                name: "hourly report".to_string(),
                agent_id: agent_id.to_string(),
                schedule_type: ScheduleType::Interval,
                cron_expression: None,
                interval_seconds: Some(3600),
                next_run: None,
                last_run: None,
                is_active: true,
                created_by: OWNER.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    pub async fn job(&self) -> Job {
        self.job_for(&self.agent.id).await
    }

    /// Store an api_key credential and bind it to the harness script
    pub async fn bind_api_key(
        &self,
        variable: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> String {
        self.bind(
            variable,
            CredentialType::ApiKey,
            serde_json::json!({ "api_key": value }),
            expires_at,
        )
        .await
    }

    pub async fn bind(
        &self,
        variable: &str,
        credential_type: CredentialType,
        payload: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> String {
        let summary = self
            .credentials
            .create(
                NewCredential {
                    owner: OWNER.to_string(),
                    name: variable.to_lowercase(),
                    description: None,
                    payload: CredentialPayload::from_value(credential_type, payload).unwrap(),
                    tags: Vec::new(),
                    expires_at,
                },
                PASSWORD,
            )
            .await
            .unwrap();
        self.storage
            .assign_credential(&self.script.id, &summary.id, variable)
            .await
            .unwrap();
        summary.id
    }
}
