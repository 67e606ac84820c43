//! ABOUTME: Integration tests for the Execution Coordinator
//! ABOUTME: Status mapping, retries, timeouts, credential failures and per-job exclusion

mod common;

use automa_config::SandboxConfig;
use automa_core::{ErrorKind, ExecutionStatus};
use automa_executions::{ExecutionError, Trigger};
use automa_sandbox::ProviderError;
use chrono::{Duration as ChronoDuration, Utc};
use common::{create_agent, harness, harness_with, PASSWORD};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_successful_run_injects_credentials_and_redacts_output() {
    let h = harness().await;
    h.bind_api_key("API_TOKEN", "sk-live-abcdef123456", None).await;
    h.provider.set_output("token is sk-live-abcdef123456\n", "");
    let job = h.job().await;

    let execution = h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.exit_code, Some(0));
    assert_eq!(execution.attempts, 1);
    assert!(execution.finished_at.is_some());
    assert_eq!(execution.output.as_deref(), Some("token is ***\n"));
    assert_eq!(
        h.provider.last_env().get("API_TOKEN").map(String::as_str),
        Some("sk-live-abcdef123456")
    );
    assert_eq!(h.provider.live_containers(), 0);
}

#[tokio::test]
async fn test_successful_decrypt_touches_last_used() {
    let h = harness().await;
    let credential_id = h.bind_api_key("API_TOKEN", "sk-live-abcdef123456", None).await;
    let job = h.job().await;

    h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    let credential = h.storage.get_credential(&credential_id).await.unwrap();
    assert!(credential.last_used_at.is_some());
}

#[tokio::test]
async fn test_nonzero_exit_fails_without_retry() {
    let h = harness().await;
    h.provider.set_exit_code(2);
    h.provider.set_output("", "Traceback: boom\n");
    let job = h.job().await;

    let execution = h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.exit_code, Some(2));
    assert_eq!(execution.error_kind, Some(ErrorKind::ScriptRuntime));
    assert_eq!(execution.error_log.as_deref(), Some("script_runtime: Traceback: boom\n"));
    assert_eq!(h.provider.created().len(), 1);
}

#[tokio::test]
async fn test_two_transient_failures_then_success_records_three_attempts() {
    let h = harness().await;
    h.provider.fail_creates(vec![
        ProviderError::Unreachable("daemon restarting".into()),
        ProviderError::Unreachable("daemon restarting".into()),
    ]);
    let job = h.job().await;

    let execution = h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.attempts, 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_without_leaking_containers() {
    let h = harness().await;
    h.provider.fail_starts(vec![
        ProviderError::ResourceExhausted("no memory".into()),
        ProviderError::ResourceExhausted("no memory".into()),
        ProviderError::ResourceExhausted("no memory".into()),
    ]);
    let job = h.job().await;

    let execution = h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_kind, Some(ErrorKind::TransientInfra));
    assert_eq!(execution.attempts, 3);
    assert_eq!(h.provider.created().len(), 3);
    assert_eq!(h.provider.live_containers(), 0);
}

#[tokio::test]
async fn test_missing_image_is_terminal_config() {
    let h = harness().await;
    h.provider
        .fail_creates(vec![ProviderError::ImageNotFound("automa-sandbox:latest".into())]);
    let job = h.job().await;

    let execution = h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_kind, Some(ErrorKind::TerminalConfig));
    assert_eq!(execution.attempts, 1);
}

#[tokio::test]
async fn test_timeout_tears_down_container() {
    let config = SandboxConfig {
        timeout: Duration::from_millis(100),
        ..SandboxConfig::default()
    };
    let h = harness_with(config).await;
    h.provider.hang();
    let job = h.job().await;

    let execution = h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Timeout);
    assert_eq!(execution.error_kind, Some(ErrorKind::Timeout));
    assert!(execution.finished_at.is_some());
    assert_eq!(h.provider.killed().len(), 1);
    assert_eq!(h.provider.live_containers(), 0);
}

#[tokio::test]
async fn test_wrong_password_never_starts_a_container() {
    let h = harness().await;
    h.bind_api_key("API_TOKEN", "sk-live-abcdef123456", None).await;
    let job = h.job().await;

    let execution = h
        .coordinator
        .execute(&job.id, Trigger::manual_with_password("not the password"))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_kind, Some(ErrorKind::CredentialAuth));
    assert_eq!(execution.attempts, 0);
    assert!(!execution.error_log.unwrap_or_default().contains("sk-live"));
    assert!(h.provider.created().is_empty());
}

#[tokio::test]
async fn test_expired_credential_fails_even_with_correct_password() {
    let h = harness().await;
    let expired = Utc::now() - ChronoDuration::hours(1);
    h.bind_api_key("API_TOKEN", "sk-live-abcdef123456", Some(expired)).await;
    let job = h.job().await;

    let execution = h
        .coordinator
        .execute(&job.id, Trigger::manual_with_password(PASSWORD))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_kind, Some(ErrorKind::CredentialExpired));
    assert!(h.provider.created().is_empty());
}

#[tokio::test]
async fn test_agent_without_script_is_terminal_config() {
    let h = harness().await;
    let agent = create_agent(&h.storage, None).await;
    let job = h.job_for(&agent.id).await;

    let execution = h.coordinator.execute(&job.id, Trigger::Scheduled).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_kind, Some(ErrorKind::TerminalConfig));
    assert!(h.provider.created().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_an_error_without_execution_row() {
    let h = harness().await;
    let err = h
        .coordinator
        .execute("job_missing", Trigger::manual())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TerminalConfig);
    assert!(!h.coordinator.locks().is_held("job_missing"));
}

#[tokio::test]
async fn test_overlapping_trigger_is_refused() {
    let h = harness().await;
    h.provider.set_run_duration(Duration::from_millis(400));
    let job = h.job().await;

    let coordinator = h.coordinator.clone();
    let job_id = job.id.clone();
    let first = tokio::spawn(async move { coordinator.execute(&job_id, Trigger::Scheduled).await });

    while !h.coordinator.locks().is_held(&job.id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = h.coordinator.execute(&job.id, Trigger::manual()).await;
    assert!(matches!(second, Err(ExecutionError::SchedulingConflict(_))));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, ExecutionStatus::Success);

    let executions = h.storage.list_executions(&job.id, 10).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert!(!h.coordinator.locks().is_held(&job.id));
}

#[tokio::test]
async fn test_run_in_another_coordinator_is_refused() {
    let h = harness().await;
    h.provider.set_run_duration(Duration::from_millis(400));
    let job = h.job().await;
    let peer = h.peer_coordinator();

    let coordinator = h.coordinator.clone();
    let job_id = job.id.clone();
    let first = tokio::spawn(async move { coordinator.execute(&job_id, Trigger::Scheduled).await });

    while h.storage.list_executions(&job.id, 1).await.unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = peer.execute(&job.id, Trigger::manual()).await;
    assert!(matches!(second, Err(ExecutionError::SchedulingConflict(_))));
    assert!(!peer.locks().is_held(&job.id));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, ExecutionStatus::Success);
    assert_eq!(h.storage.list_executions(&job.id, 10).await.unwrap().len(), 1);

    // Once the first run is recorded the peer may run the job
    let later = peer.execute(&job.id, Trigger::manual()).await.unwrap();
    assert_eq!(later.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_recover_fails_interrupted_executions() {
    let h = harness().await;
    let job = h.job().await;
    let stale = h.storage.create_execution(&job.id).await.unwrap();
    h.storage.mark_execution_running(&stale.id).await.unwrap();

    // Too recent to rule out a live run in another process
    assert_eq!(h.coordinator.recover().await.unwrap(), 0);
    let untouched = h.storage.get_execution(&stale.id).await.unwrap();
    assert_eq!(untouched.status, ExecutionStatus::Running);

    let cutoff = Utc::now() + ChronoDuration::seconds(1);
    assert_eq!(h.coordinator.recover_started_before(cutoff).await.unwrap(), 1);

    let recovered = h.storage.get_execution(&stale.id).await.unwrap();
    assert_eq!(recovered.status, ExecutionStatus::Failed);
    assert_eq!(recovered.error_kind, Some(ErrorKind::TransientInfra));

    // The job can run again
    let execution = h.coordinator.execute(&job.id, Trigger::manual()).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_run_window_covers_every_attempt_and_backoff() {
    let h = harness().await;
    let config = SandboxConfig::default();

    // Three attempts with 5ms then 10ms of backoff between them
    let expected = config.timeout * 3
        + Duration::from_millis(15)
        + config.stop_grace
        + Duration::from_secs(60);
    assert_eq!(h.coordinator.run_window(), expected);
}

#[tokio::test]
async fn test_failed_terminal_write_releases_the_job() {
    let h = harness().await;
    h.provider.set_run_duration(Duration::from_millis(200));
    let job = h.job().await;

    let coordinator = h.coordinator.clone();
    let job_id = job.id.clone();
    let run = tokio::spawn(async move { coordinator.execute(&job_id, Trigger::Scheduled).await });

    while !h.coordinator.locks().is_held(&job.id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.storage.close().await;

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, ExecutionError::Storage(_)));
    assert_eq!(err.kind(), ErrorKind::TransientInfra);
    assert!(!h.coordinator.locks().is_held(&job.id));
}
