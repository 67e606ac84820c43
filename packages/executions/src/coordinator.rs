// ABOUTME: Execution Coordinator: turns a job trigger into one sandboxed run and a terminal record
// ABOUTME: Serialized per job id; credential failures end the run before any container exists

use crate::error::{ExecutionError, Result};
use crate::locks::{JobLocks, RunSlot};
use crate::password::PasswordSource;
use crate::resolve::{redact, ScriptResolver};
use automa_core::{ErrorKind, ExecutionStatus, Job, JobExecution};
use automa_sandbox::{RetryPolicy, RunOutcome, RunResult, SandboxRuntime};
use automa_security::CredentialService;
use automa_storage::{Storage, StorageError, TerminalState};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

const RUN_WINDOW_SLACK: Duration = Duration::from_secs(60);

/// What started a run
pub enum Trigger {
    /// Started by a user; `password` overrides the configured source
    Manual { password: Option<Zeroizing<String>> },
    Scheduled,
}

impl Trigger {
    pub fn manual() -> Self {
        Self::Manual { password: None }
    }

    pub fn manual_with_password(password: impl Into<String>) -> Self {
        Self::Manual {
            password: Some(Zeroizing::new(password.into())),
        }
    }

    fn password(&self) -> Option<&str> {
        match self {
            Self::Manual { password } => password.as_ref().map(|p| p.as_str()),
            Self::Scheduled => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Manual { .. } => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone)]
pub struct Coordinator {
    storage: Storage,
    resolver: ScriptResolver,
    sandbox: Arc<SandboxRuntime>,
    retry: RetryPolicy,
    locks: JobLocks,
}

impl Coordinator {
    pub fn new(
        storage: Storage,
        credentials: CredentialService,
        sandbox: Arc<SandboxRuntime>,
        retry: RetryPolicy,
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
            retry,
            locks: JobLocks::new(),
        }
    }

    pub fn locks(&self) -> &JobLocks {
        &self.locks
    }

    /// Reserve `job_id` without running it yet
    pub fn try_reserve(&self, job_id: &str) -> Option<RunSlot> {
        self.locks.try_acquire(job_id)
    }

    /// Run a job now. Refused with `SchedulingConflict` while a previous run of
    /// the same job is in flight; no execution row is created in that case.
    pub async fn execute(&self, job_id: &str, trigger: Trigger) -> Result<JobExecution> {
        let Some(slot) = self.locks.try_acquire(job_id) else {
            warn!(%job_id, trigger = trigger.label(), "Execution skipped, previous run still in flight");
            return Err(ExecutionError::SchedulingConflict(job_id.to_string()));
        };
        self.execute_reserved(slot, trigger).await
    }

    /// Run the job held by `slot`. Once the execution row exists every failure
    /// is recorded on it and the terminal record is returned.
    pub async fn execute_reserved(&self, slot: RunSlot, trigger: Trigger) -> Result<JobExecution> {
        let job = self.storage.get_job(slot.job_id()).await?;
        // The in-process slot only covers this coordinator; the row covers every process
        let execution = match self.storage.create_execution(&job.id).await {
            Err(StorageError::ExecutionInFlight(_)) => {
                warn!(
                    job_id = %job.id,
                    trigger = trigger.label(),
                    "Execution skipped, another process has a run in flight"
                );
                return Err(ExecutionError::SchedulingConflict(job.id));
            }
            other => other?,
        };
        self.storage.mark_execution_running(&execution.id).await?;
        info!(
            job_id = %job.id,
            execution_id = %execution.id,
            trigger = trigger.label(),
            "Execution started"
        );

        let state = self.run(&job, &trigger).await;
        let finished = self.finish(&execution.id, state).await;
        drop(slot);
        let finished = finished?;

        match finished.error_kind {
            None => info!(job_id = %job.id, execution_id = %finished.id, "Execution succeeded"),
            Some(kind) => warn!(
                job_id = %job.id,
                execution_id = %finished.id,
                status = %finished.status,
                error_kind = %kind,
                "Execution did not succeed"
            ),
        }
        Ok(finished)
    }

    /// Write the terminal record, retrying once. A row left running after that is
    /// closed by a later `recover`.
    async fn finish(&self, execution_id: &str, state: TerminalState) -> Result<JobExecution> {
        let first = match self.storage.finish_execution(execution_id, state.clone()).await {
            Ok(finished) => return Ok(finished),
            Err(e @ StorageError::AlreadyTerminal(_)) => return Err(e.into()),
            Err(e) => e,
        };
        warn!(%execution_id, error = %first, "Terminal write failed, retrying once");

        self.storage
            .finish_execution(execution_id, state)
            .await
            .map_err(|e| {
                error!(
                    %execution_id,
                    error = %e,
                    "Terminal write failed; execution stays in flight until recovery"
                );
                ExecutionError::from(e)
            })
    }

    async fn run(&self, job: &Job, trigger: &Trigger) -> TerminalState {
        let now = Utc::now();
        let resolved = match self.storage.get_agent(&job.agent_id).await {
            Ok(agent) => {
                self.resolver
                    .resolve(&agent, &job.created_by, trigger.password(), now)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            // Nothing was started; no sandbox attempt to report
            Err(e) => return failure(&e, 0),
        };

        let request = self
            .sandbox
            .request(resolved.script.content.clone(), resolved.env);
        match self.sandbox.run(request, &self.retry).await {
            Ok(result) => terminal_state(result, &resolved.secrets),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Sandbox run failed");
                let attempts = e.attempts().unwrap_or(1);
                failure(&ExecutionError::Sandbox(e), attempts)
            }
        }
    }

    /// Longest a live run can stay in flight: every attempt hitting its deadline,
    /// every backoff slept, then the stop grace and some slack.
    pub fn run_window(&self) -> Duration {
        let config = self.sandbox.config();
        let attempts = self.retry.max_attempts;
        let backoff: Duration = (1..attempts).map(|attempt| self.retry.delay_for(attempt)).sum();
        config
            .timeout
            .saturating_mul(attempts)
            .saturating_add(backoff)
            .saturating_add(config.stop_grace)
            .saturating_add(RUN_WINDOW_SLACK)
    }

    /// Fail executions left pending or running by a dead process. Rows younger than
    /// `run_window` are kept since another process may still own them.
    pub async fn recover(&self) -> Result<u64> {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.run_window())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.recover_started_before(cutoff).await
    }

    /// Fail every in-flight execution started before `cutoff`
    pub async fn recover_started_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .storage
            .fail_interrupted_executions(Utc::now(), cutoff)
            .await?)
    }
}

fn failure(error: &ExecutionError, attempts: u32) -> TerminalState {
    TerminalState {
        status: ExecutionStatus::Failed,
        finished_at: Utc::now(),
        exit_code: None,
        output: None,
        error_log: Some(tagged(error.kind(), Some(error.to_string()))),
        error_kind: Some(error.kind()),
        attempts,
    }
}

fn terminal_state(result: RunResult, secrets: &[String]) -> TerminalState {
    let output = non_empty(redact(&result.stdout, secrets));
    let stderr = non_empty(redact(&result.stderr, secrets));

    let (status, exit_code, error_kind, error_log) = match result.outcome {
        RunOutcome::Exited { exit_code: 0 } => (ExecutionStatus::Success, Some(0), None, stderr),
        RunOutcome::Exited { exit_code } => (
            ExecutionStatus::Failed,
            Some(exit_code),
            Some(ErrorKind::ScriptRuntime),
            Some(tagged(ErrorKind::ScriptRuntime, stderr)),
        ),
        RunOutcome::TimedOut => {
            let note = format!(
                "Execution exceeded its deadline after {}s and was terminated",
                result.duration.as_secs()
            );
            let log = match stderr {
                Some(stderr) => format!("{}\n{}", stderr, note),
                None => note,
            };
            let log = tagged(ErrorKind::Timeout, Some(log));
            (ExecutionStatus::Timeout, None, Some(ErrorKind::Timeout), Some(log))
        }
    };

    TerminalState {
        status,
        finished_at: Utc::now(),
        exit_code,
        output,
        error_log,
        error_kind,
        attempts: result.attempts,
    }
}

/// `error_log` always leads with the stable kind code, e.g. `timeout: ...`
fn tagged(kind: ErrorKind, log: Option<String>) -> String {
    match log {
        Some(log) => format!("{}: {}", kind.code(), log),
        None => kind.code().to_string(),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
