//! ABOUTME: Integration tests for long-running agent supervision
//! ABOUTME: Start, stop, restart and shutdown against the in-memory container provider

mod common;

use automa_core::AgentStatus;
use automa_executions::ExecutionError;
use automa_sandbox::ProviderError;
use common::{create_agent, harness};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_start_then_stop_removes_container() {
    let h = harness().await;
    h.bind_api_key("API_TOKEN", "sk-agent-000111222", None).await;

    let started = h.supervisor.start_agent(&h.agent.id, None).await.unwrap();
    assert_eq!(started.status, AgentStatus::Running);
    assert!(started.container_id.is_some());
    assert_eq!(h.provider.live_containers(), 1);
    assert_eq!(
        h.provider.last_env().get("API_TOKEN").map(String::as_str),
        Some("sk-agent-000111222")
    );

    let stopped = h.supervisor.stop_agent(&h.agent.id).await.unwrap();
    assert_eq!(stopped.status, AgentStatus::Stopped);
    assert_eq!(stopped.container_id, None);
    assert_eq!(h.provider.live_containers(), 0);
}

#[tokio::test]
async fn test_start_is_idempotent_while_running() {
    let h = harness().await;
    let first = h.supervisor.start_agent(&h.agent.id, None).await.unwrap();
    let second = h.supervisor.start_agent(&h.agent.id, None).await.unwrap();

    assert_eq!(first.container_id, second.container_id);
    assert_eq!(h.provider.created().len(), 1);
}

#[tokio::test]
async fn test_restart_replaces_the_container() {
    let h = harness().await;
    let first = h.supervisor.start_agent(&h.agent.id, None).await.unwrap();
    let restarted = h.supervisor.restart_agent(&h.agent.id, None).await.unwrap();

    assert_eq!(restarted.status, AgentStatus::Running);
    assert_ne!(restarted.container_id, first.container_id);
    assert_eq!(h.provider.live_containers(), 1);
    assert_eq!(h.provider.removed(), vec![first.container_id.unwrap()]);
}

#[tokio::test]
async fn test_failed_start_marks_agent_error() {
    let h = harness().await;
    h.provider
        .fail_creates(vec![ProviderError::ImageNotFound("automa-sandbox:latest".into())]);

    let err = h.supervisor.start_agent(&h.agent.id, None).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Sandbox(_)));

    let agent = h.storage.get_agent(&h.agent.id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Error);
    assert_eq!(agent.container_id, None);
}

#[tokio::test]
async fn test_unrecorded_start_removes_the_container() {
    let h = harness().await;
    sqlx::query(
        "CREATE TRIGGER reject_running BEFORE UPDATE OF status ON agents \
         WHEN NEW.status = 'running' BEGIN SELECT RAISE(ABORT, 'status write rejected'); END",
    )
    .execute(h.storage.pool())
    .await
    .unwrap();

    let err = h.supervisor.start_agent(&h.agent.id, None).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Storage(_)));

    assert_eq!(h.provider.created().len(), 1);
    assert_eq!(h.provider.live_containers(), 0);
    assert_eq!(h.provider.removed(), h.provider.created());
    let agent = h.storage.get_agent(&h.agent.id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Stopped);
}

#[tokio::test]
async fn test_wrong_password_never_starts_agent() {
    let h = harness().await;
    h.bind_api_key("API_TOKEN", "sk-agent-000111222", None).await;

    let err = h
        .supervisor
        .start_agent(&h.agent.id, Some("wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Vault(_)));
    assert!(h.provider.created().is_empty());
}

#[tokio::test]
async fn test_shutdown_all_stops_every_running_agent() {
    let h = harness().await;
    let other = create_agent(&h.storage, Some(&h.script.id)).await;
    h.supervisor.start_agent(&h.agent.id, None).await.unwrap();
    h.supervisor.start_agent(&other.id, None).await.unwrap();

    // A stale row claiming to run without any container
    let ghost = create_agent(&h.storage, Some(&h.script.id)).await;
    h.storage
        .update_agent_status(&ghost.id, AgentStatus::Running, None)
        .await
        .unwrap();

    let report = h.supervisor.shutdown_all().await.unwrap();

    assert_eq!(report.stopped, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(h.provider.live_containers(), 0);
    for id in [&h.agent.id, &other.id, &ghost.id] {
        let agent = h.storage.get_agent(id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Stopped);
    }
}
